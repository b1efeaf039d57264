//! Chunked sequential CPU path.
//!
//! Buffers of a fixed size walk over the padded span of the file. Each buffer
//! holds `ceil(bytes / BLOCK_SIZE)` blocks; the keystream block index is the
//! absolute block number within the file, so the result is identical to the
//! whole-file dispatch.

use std::io::{Read, Write};

use tracing::trace;
use zeroize::Zeroize;

use crate::ctr::Keystream;
use crate::types::{BLOCK_SIZE, SaesError};

/// Byte counts of one file transform, shared by both paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformPlan {
    /// Bytes available from the reader.
    pub input_len: u64,
    /// Bytes to emit to the writer.
    pub output_len: u64,
    /// Host buffer size, a positive multiple of the block size.
    pub buffer_size: usize,
}

impl TransformPlan {
    /// Length covered by keystream: the longer side rounded up to whole blocks.
    pub fn span(&self) -> u64 {
        let block = BLOCK_SIZE as u64;
        self.input_len.max(self.output_len).div_ceil(block) * block
    }

    pub fn buffer_count(&self) -> u64 {
        self.span().div_ceil(self.buffer_size as u64)
    }

    /// Blocks in the buffer that starts at `offset`.
    pub fn blocks_in_buffer(&self, offset: u64) -> u64 {
        let len = (self.span() - offset).min(self.buffer_size as u64);
        len.div_ceil(BLOCK_SIZE as u64)
    }
}

/// XOR `reader` with the keystream and write the result, one buffer at a time.
///
/// On encryption `output_len` is the padded length and the missing tail of the
/// last block reads as zeros. On decryption `input_len` is the ciphertext length
/// and the last block is cut short by the padding.
pub fn transform_chunked<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    keystream: &Keystream<'_>,
    plan: TransformPlan,
) -> Result<(), SaesError> {
    let span = plan.span();
    let buffer_size = plan.buffer_size as u64;
    let mut offset = 0u64;

    while offset < span {
        let blocks = plan.blocks_in_buffer(offset);
        let mut buf = vec![0u8; (blocks * BLOCK_SIZE as u64) as usize];

        let available = plan.input_len.saturating_sub(offset).min(buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..available])?;

        let first_block = offset / BLOCK_SIZE as u64;
        keystream.apply(first_block, &mut buf);

        let emit = plan.output_len.saturating_sub(offset).min(buf.len() as u64) as usize;
        writer.write_all(&buf[..emit])?;
        trace!(first_block, blocks, emit, "buffer processed");

        buf.zeroize();
        offset += buffer_size;
    }
    Ok(())
}
