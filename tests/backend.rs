use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, Mutex};

use saes_file::{
    AccessMode, BackendError, BufferHandle, CipherKey, ComputeBackend, ErrorKind, ExecutionMode,
    KeySchedule, KeySize, Keystream, Nonce, ParallelDevice, PasswordBlock, RunOptions,
    derive_nonce, dispatch_keystream, encrypt_bytes, encrypt_file,
};
use secrecy::SecretString;

/// Wraps a real device, counting calls and injecting failures.
struct Recording {
    inner: ParallelDevice,
    faults: Faults,
    log: Arc<Mutex<Log>>,
}

#[derive(Default, Clone, Copy)]
struct Faults {
    dispatch: bool,
    /// Fail the n-th allocation (0-based).
    allocation: Option<usize>,
    first_release: bool,
}

#[derive(Default)]
struct Log {
    live: HashSet<BufferHandle>,
    allocations: usize,
    releases: usize,
    dispatches: Vec<usize>,
}

impl Recording {
    fn new(faults: Faults) -> (Self, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let dev = Self {
            inner: ParallelDevice::with_threads(1).unwrap(),
            faults,
            log: Arc::clone(&log),
        };
        (dev, log)
    }
}

impl ComputeBackend for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    fn allocate_and_write(
        &mut self,
        data: &[u8],
        access: AccessMode,
    ) -> Result<BufferHandle, BackendError> {
        let mut log = self.log.lock().unwrap();
        let n = log.allocations;
        log.allocations += 1;
        if self.faults.allocation == Some(n) {
            return Err(BackendError::new("out of device memory"));
        }
        let h = self.inner.allocate_and_write(data, access)?;
        log.live.insert(h);
        Ok(h)
    }

    fn bind_argument(&mut self, slot: u32, buffer: BufferHandle) -> Result<(), BackendError> {
        self.inner.bind_argument(slot, buffer)
    }

    fn dispatch_1d(&mut self, element_count: usize) -> Result<(), BackendError> {
        self.log.lock().unwrap().dispatches.push(element_count);
        if self.faults.dispatch {
            return Err(BackendError::new("device lost"));
        }
        self.inner.dispatch_1d(element_count)
    }

    fn read_back(&mut self, buffer: BufferHandle, len: usize) -> Result<Vec<u8>, BackendError> {
        self.inner.read_back(buffer, len)
    }

    fn release(&mut self, buffer: BufferHandle) -> Result<(), BackendError> {
        let mut log = self.log.lock().unwrap();
        log.releases += 1;
        if self.faults.first_release && log.releases == 1 {
            return Err(BackendError::new("release refused"));
        }
        log.live.remove(&buffer);
        self.inner.release(buffer)
    }
}

fn pw() -> SecretString {
    SecretString::new("pw".into())
}

#[test]
fn one_dispatch_per_file_sized_in_blocks() {
    let (dev, log) = Recording::new(Faults::default());
    let mut mode = ExecutionMode::initialize(false, || Ok(Box::new(dev) as Box<dyn ComputeBackend>));
    assert!(mode.is_gpu());

    let opts = RunOptions::default();
    let container = encrypt_bytes(&[1u8; 33], ".a", &pw(), KeySize::Aes128, &mut mode, &opts).unwrap();
    encrypt_bytes(&[2u8; 16], ".b", &pw(), KeySize::Aes192, &mut mode, &opts).unwrap();
    assert_eq!(container.len(), 48 + 48);

    let log = log.lock().unwrap();
    assert_eq!(log.dispatches, vec![3, 1]);
    assert!(log.live.is_empty());
}

#[test]
fn dispatch_failure_is_fatal_and_releases_buffers() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("keep.txt");
    fs::write(&input, b"must survive").unwrap();

    let (dev, log) = Recording::new(Faults {
        dispatch: true,
        ..Faults::default()
    });
    let mut mode = ExecutionMode::Gpu(Box::new(dev));
    let err = encrypt_file(&input, &pw(), KeySize::Aes256, &mut mode, &RunOptions::default())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Backend);
    assert!(err.to_string().contains("device lost"));
    assert!(log.lock().unwrap().live.is_empty());
    assert_eq!(fs::read(&input).unwrap(), b"must survive");
    assert!(!dir.path().join("keep.saes").exists());
    // Still the device after a failure; no silent switch to the CPU mid-run.
    assert!(mode.is_gpu());
}

fn keystream_fixture() -> (KeySchedule, Nonce) {
    let block = PasswordBlock::new(b"pw");
    let schedule = CipherKey::from_password(block.as_bytes(), KeySize::Aes128).schedule();
    (schedule, derive_nonce(&block))
}

#[test]
fn failed_allocation_releases_earlier_buffers() {
    let (schedule, nonce) = keystream_fixture();
    let ks = Keystream::new(&schedule, nonce);

    for failing in 0..3 {
        let (mut dev, log) = Recording::new(Faults {
            allocation: Some(failing),
            ..Faults::default()
        });
        let err = dispatch_keystream(&mut dev, &ks, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(err.to_string().contains("out of device memory"));

        let log = log.lock().unwrap();
        assert!(log.live.is_empty(), "allocation {failing} leaked {:?}", log.live);
        assert_eq!(log.releases, failing);
        assert!(log.dispatches.is_empty());
        assert_eq!(dev.inner.live_buffers(), 0);
    }
}

#[test]
fn failed_release_does_not_skip_the_others() {
    let (schedule, nonce) = keystream_fixture();
    let ks = Keystream::new(&schedule, nonce);
    let (mut dev, log) = Recording::new(Faults {
        first_release: true,
        ..Faults::default()
    });

    let err = dispatch_keystream(&mut dev, &ks, 2).unwrap_err();
    assert!(err.to_string().contains("release refused"));

    let log = log.lock().unwrap();
    assert_eq!(log.releases, 3);
    assert_eq!(log.live.len(), 1);
    assert_eq!(dev.inner.live_buffers(), 1);
}
