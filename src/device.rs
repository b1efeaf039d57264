//! Compute backend interface and the whole-file dispatch path.
//!
//! A backend is an opaque service that owns device buffers, binds them to the
//! slots of the SAES kernel and runs a blocking one-dimensional dispatch. The
//! kernel has three slots:
//!
//! | slot | buffer | access |
//! |------|--------|--------|
//! | 0 | nonce-counter blocks, replaced in place by keystream | read-write |
//! | 1 | forward substitution table | read-only |
//! | 2 | serialized round keys | read-only |
//!
//! One work item transforms one block; the dispatch size is the block count.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};

use rayon::prelude::*;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::cipher::KeySchedule;
use crate::ctr::{Keystream, counter_blocks};
use crate::streaming::TransformPlan;
use crate::tables::{SBOX, TABLE_SIZE};
use crate::types::{BLOCK_SIZE, BackendError, SaesError};

/// Kernel slot of the nonce-counter buffer.
pub const SLOT_BLOCKS: u32 = 0;
/// Kernel slot of the substitution table.
pub const SLOT_SBOX: u32 = 1;
/// Kernel slot of the round keys.
pub const SLOT_ROUND_KEYS: u32 = 2;

/// Device-side access of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// Opaque handle of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(u64);

/// A data-parallel device able to run the SAES kernel.
pub trait ComputeBackend: Send {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Allocate a buffer of `data.len()` bytes and upload `data` into it.
    fn allocate_and_write(
        &mut self,
        data: &[u8],
        access: AccessMode,
    ) -> Result<BufferHandle, BackendError>;

    /// Bind `buffer` to kernel argument `slot`.
    fn bind_argument(&mut self, slot: u32, buffer: BufferHandle) -> Result<(), BackendError>;

    /// Run the kernel over `element_count` work items and wait for completion.
    fn dispatch_1d(&mut self, element_count: usize) -> Result<(), BackendError>;

    /// Copy the first `len` bytes of `buffer` back to the host.
    fn read_back(&mut self, buffer: BufferHandle, len: usize) -> Result<Vec<u8>, BackendError>;

    /// Free `buffer`.
    fn release(&mut self, buffer: BufferHandle) -> Result<(), BackendError>;
}

/// Which path produces keystream for the rest of the run.
///
/// Decided once when the run starts and never revisited.
pub enum ExecutionMode {
    Gpu(Box<dyn ComputeBackend>),
    CpuOnly,
}

impl ExecutionMode {
    /// Bring up the backend unless `force_cpu` is set.
    ///
    /// `discover` is called at most once. If it fails the run continues on the
    /// CPU for every file; there is no retry.
    pub fn initialize<F>(force_cpu: bool, discover: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn ComputeBackend>, BackendError>,
    {
        if force_cpu {
            info!("CPU execution forced, skipping backend discovery");
            return Self::CpuOnly;
        }
        match discover() {
            Ok(backend) => {
                info!(device = backend.name(), "using compute device");
                Self::Gpu(backend)
            }
            Err(e) => {
                warn!(error = %e, "compute backend unavailable, defaulting to CPU execution");
                Self::CpuOnly
            }
        }
    }

    /// Initialize with the built-in [`ParallelDevice`].
    pub fn detect(force_cpu: bool) -> Self {
        Self::initialize(force_cpu, || {
            ParallelDevice::discover().map(|d| Box::new(d) as Box<dyn ComputeBackend>)
        })
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self, Self::Gpu(_))
    }
}

impl std::fmt::Debug for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gpu(backend) => f.debug_tuple("Gpu").field(&backend.name()).finish(),
            Self::CpuOnly => f.write_str("CpuOnly"),
        }
    }
}

/// Produce the keystream of `block_count` blocks with one dispatch.
///
/// Every buffer that was allocated is released before returning, whether an
/// allocation, the dispatch or another release failed. The first error wins.
pub fn dispatch_keystream(
    backend: &mut dyn ComputeBackend,
    keystream: &Keystream<'_>,
    block_count: u64,
) -> Result<Vec<u8>, SaesError> {
    let counters = counter_blocks(keystream.nonce(), block_count);
    let round_keys = zeroize::Zeroizing::new(keystream.schedule().round_key_bytes());

    let mut handles = Vec::with_capacity(3);
    let result = upload_and_run(backend, counters, &round_keys, &mut handles);
    let released = handles
        .iter()
        .map(|&h| backend.release(h))
        .fold(Ok(()), |first, r| first.and(r));

    let out = result?;
    released?;
    debug!(blocks = block_count, device = backend.name(), "dispatch complete");
    Ok(out)
}

/// Upload the kernel arguments, recording each handle as soon as it exists.
///
/// The host copy of the counters is dropped once uploaded.
fn upload_and_run(
    backend: &mut dyn ComputeBackend,
    counters: Vec<u8>,
    round_keys: &[u8],
    handles: &mut Vec<BufferHandle>,
) -> Result<Vec<u8>, BackendError> {
    let len = counters.len();
    handles.push(backend.allocate_and_write(&counters, AccessMode::ReadWrite)?);
    drop(counters);
    handles.push(backend.allocate_and_write(&SBOX, AccessMode::ReadOnly)?);
    handles.push(backend.allocate_and_write(round_keys, AccessMode::ReadOnly)?);
    run_kernel(backend, [handles[0], handles[1], handles[2]], len)
}

/// Whole-file path: read everything, dispatch once, XOR, write.
///
/// Peak memory is about three times the padded file size: the host data, the
/// device buffer and the keystream read back from it.
pub fn transform_whole<R: Read, W: Write>(
    backend: &mut dyn ComputeBackend,
    reader: &mut R,
    writer: &mut W,
    keystream: &Keystream<'_>,
    plan: TransformPlan,
) -> Result<(), SaesError> {
    let span = plan.span();
    let too_large = || SaesError::Invalid("file too large for a single dispatch");
    let mut data = vec![0u8; usize::try_from(span).map_err(|_| too_large())?];
    let input_len = usize::try_from(plan.input_len).map_err(|_| too_large())?;
    let output_len = usize::try_from(plan.output_len).map_err(|_| too_large())?;

    reader.read_exact(&mut data[..input_len])?;

    let mut stream = dispatch_keystream(backend, keystream, span / BLOCK_SIZE as u64)?;
    for (d, k) in data.iter_mut().zip(stream.iter()) {
        *d ^= k;
    }
    stream.zeroize();

    writer.write_all(&data[..output_len])?;
    data.zeroize();
    Ok(())
}

fn run_kernel(
    backend: &mut dyn ComputeBackend,
    [blocks, sbox, keys]: [BufferHandle; 3],
    len: usize,
) -> Result<Vec<u8>, BackendError> {
    backend.bind_argument(SLOT_BLOCKS, blocks)?;
    backend.bind_argument(SLOT_SBOX, sbox)?;
    backend.bind_argument(SLOT_ROUND_KEYS, keys)?;
    backend.dispatch_1d(len / BLOCK_SIZE)?;
    backend.read_back(blocks, len)
}

struct DeviceBuffer {
    data: Vec<u8>,
    access: AccessMode,
}

/// Host-side data-parallel device running the kernel on a dedicated thread pool.
pub struct ParallelDevice {
    name: String,
    pool: rayon::ThreadPool,
    buffers: HashMap<BufferHandle, DeviceBuffer>,
    args: BTreeMap<u32, BufferHandle>,
    next_handle: u64,
}

impl ParallelDevice {
    /// Build a device using all available cores.
    pub fn discover() -> Result<Self, BackendError> {
        Self::with_threads(0)
    }

    /// Build a device with `threads` workers (0 = rayon's default).
    pub fn with_threads(threads: usize) -> Result<Self, BackendError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("saes-device-{i}"))
            .build()
            .map_err(|e| BackendError::new(format!("cannot start device threads: {e}")))?;
        let name = format!("host parallel device ({} threads)", pool.current_num_threads());
        Ok(Self {
            name,
            pool,
            buffers: HashMap::new(),
            args: BTreeMap::new(),
            next_handle: 1,
        })
    }

    /// Number of live buffers.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn arg(&self, slot: u32) -> Result<&DeviceBuffer, BackendError> {
        let handle = self
            .args
            .get(&slot)
            .ok_or_else(|| BackendError::new(format!("kernel argument {slot} is not bound")))?;
        self.buffers
            .get(handle)
            .ok_or_else(|| BackendError::new(format!("kernel argument {slot} was released")))
    }
}

impl ComputeBackend for ParallelDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn allocate_and_write(
        &mut self,
        data: &[u8],
        access: AccessMode,
    ) -> Result<BufferHandle, BackendError> {
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        self.buffers.insert(
            handle,
            DeviceBuffer {
                data: data.to_vec(),
                access,
            },
        );
        Ok(handle)
    }

    fn bind_argument(&mut self, slot: u32, buffer: BufferHandle) -> Result<(), BackendError> {
        if slot > SLOT_ROUND_KEYS {
            return Err(BackendError::new(format!("kernel has no argument {slot}")));
        }
        if !self.buffers.contains_key(&buffer) {
            return Err(BackendError::new("binding an unknown buffer"));
        }
        self.args.insert(slot, buffer);
        Ok(())
    }

    fn dispatch_1d(&mut self, element_count: usize) -> Result<(), BackendError> {
        let table: [u8; TABLE_SIZE] = self
            .arg(SLOT_SBOX)?
            .data
            .as_slice()
            .try_into()
            .map_err(|_| BackendError::new("substitution table has the wrong size"))?;
        let schedule = KeySchedule::from_round_key_bytes(&self.arg(SLOT_ROUND_KEYS)?.data)
            .map_err(|e| BackendError::new(e.to_string()))?;

        let blocks = self.arg(SLOT_BLOCKS)?;
        if blocks.access != AccessMode::ReadWrite {
            return Err(BackendError::new("output buffer is read-only"));
        }
        if element_count * BLOCK_SIZE > blocks.data.len() {
            return Err(BackendError::new("dispatch exceeds the output buffer"));
        }

        let handle = self.args[&SLOT_BLOCKS];
        let pool = &self.pool;
        let data = &mut self
            .buffers
            .get_mut(&handle)
            .ok_or_else(|| BackendError::new("output buffer was released"))?
            .data;

        pool.install(|| {
            data[..element_count * BLOCK_SIZE]
                .par_chunks_exact_mut(BLOCK_SIZE)
                .for_each(|chunk| {
                    let mut block = [0u8; BLOCK_SIZE];
                    block.copy_from_slice(chunk);
                    chunk.copy_from_slice(&schedule.encrypt_block_with(&block, &table));
                });
        });
        Ok(())
    }

    fn read_back(&mut self, buffer: BufferHandle, len: usize) -> Result<Vec<u8>, BackendError> {
        let buf = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| BackendError::new("reading an unknown buffer"))?;
        buf.data
            .get(..len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| BackendError::new("read exceeds buffer size"))
    }

    fn release(&mut self, buffer: BufferHandle) -> Result<(), BackendError> {
        let mut buf = self
            .buffers
            .remove(&buffer)
            .ok_or_else(|| BackendError::new("releasing an unknown buffer"))?;
        buf.data.zeroize();
        self.args.retain(|_, h| *h != buffer);
        Ok(())
    }
}
