//! Counter-mode keystream construction.
//!
//! Keystream block `k` is the forward transform of `nonce || k` with `k` as a
//! 64-bit big-endian block index. Encryption and decryption both XOR the
//! keystream into the data, so both backends only ever need the forward
//! transform.
//!
//! The nonce is a fixed, reversible function of the first password bytes and
//! is reused for every file encrypted with the same password. This is a known
//! weakness kept for compatibility with existing containers.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cipher::KeySchedule;
use crate::types::{BLOCK_SIZE, Block};

/// Nonce length: one block minus the 64-bit counter.
pub const NONCE_SIZE: usize = BLOCK_SIZE - 8;

pub type Nonce = [u8; NONCE_SIZE];

/// Password truncated or zero-padded to one block.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PasswordBlock([u8; BLOCK_SIZE]);

impl PasswordBlock {
    pub fn new(password: &[u8]) -> Self {
        let mut block = [0u8; BLOCK_SIZE];
        let n = password.len().min(BLOCK_SIZE);
        block[..n].copy_from_slice(&password[..n]);
        Self(block)
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }
}

/// `nonce[i] = (pw[i] & !pw[i + 1]) >> 2`.
pub fn derive_nonce(password: &PasswordBlock) -> Nonce {
    let pw = password.as_bytes();
    let mut nonce = [0u8; NONCE_SIZE];
    for (i, n) in nonce.iter_mut().enumerate() {
        *n = (pw[i] & !pw[i + 1]) >> 2;
    }
    nonce
}

/// `nonce || index` as one block.
pub fn counter_block(nonce: &Nonce, index: u64) -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    block[..NONCE_SIZE].copy_from_slice(nonce);
    block[NONCE_SIZE..].copy_from_slice(&index.to_be_bytes());
    block
}

/// Counter blocks `0..count` laid out back to back.
pub fn counter_blocks(nonce: &Nonce, count: u64) -> Vec<u8> {
    (0..count).flat_map(|k| counter_block(nonce, k)).collect()
}

/// Keystream of one file: a key schedule plus the nonce.
#[derive(Debug)]
pub struct Keystream<'a> {
    schedule: &'a KeySchedule,
    nonce: Nonce,
}

impl<'a> Keystream<'a> {
    pub fn new(schedule: &'a KeySchedule, nonce: Nonce) -> Self {
        Self { schedule, nonce }
    }

    pub fn schedule(&self) -> &KeySchedule {
        self.schedule
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    /// Keystream block at absolute block index `index`.
    pub fn block(&self, index: u64) -> Block {
        self.schedule
            .encrypt_block(&counter_block(&self.nonce, index))
    }

    /// XOR `data` with the keystream starting at block `first_block`.
    ///
    /// `data` may end in a partial block; only that many keystream bytes are used.
    pub fn apply(&self, first_block: u64, data: &mut [u8]) {
        for (k, chunk) in (first_block..).zip(data.chunks_mut(BLOCK_SIZE)) {
            let ks = self.block(k);
            for (d, s) in chunk.iter_mut().zip(ks.iter()) {
                *d ^= s;
            }
        }
    }
}
