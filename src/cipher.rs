//! Block cipher core: key schedule expansion and the single-block transforms.
//!
//! The cipher is Rijndael with a 128-bit block and 128/192/256-bit keys. The
//! state is a 4×4 byte matrix filled column by column, so `state[row][col]`
//! holds input byte `row + 4 * col`.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::tables::{INV_SBOX, RCON, SBOX, TABLE_SIZE};
use crate::types::{BLOCK_SIZE, Block, KeySize, SaesError};

const STATE_DIM: usize = 4;

/// Rounds of the largest key size.
pub const MAX_ROUNDS: usize = 14;

/// Largest key length in bytes.
pub const MAX_KEY_BYTES: usize = 32;

const MAX_SCHEDULE_WORDS: usize = STATE_DIM * (MAX_ROUNDS + 1);

type Word = [u8; 4];

#[inline]
fn xtime(x: u8) -> u8 {
    (x << 1) ^ (((x >> 7) & 1) * 0x1b)
}

/// Multiplication in GF(2^8) by repeated doubling.
fn gf_mul(mut x: u8, mut y: u8) -> u8 {
    let mut acc = 0;
    while y != 0 {
        if y & 1 != 0 {
            acc ^= x;
        }
        x = xtime(x);
        y >>= 1;
    }
    acc
}

fn sub_word(word: &mut Word, table: &[u8; TABLE_SIZE]) {
    for b in word.iter_mut() {
        *b = table[usize::from(*b)];
    }
}

/// The 4×4 cipher state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct State([[u8; STATE_DIM]; STATE_DIM]);

impl State {
    pub fn from_block(block: &Block) -> Self {
        let mut rows = [[0u8; STATE_DIM]; STATE_DIM];
        for (i, b) in block.iter().enumerate() {
            rows[i % STATE_DIM][i / STATE_DIM] = *b;
        }
        Self(rows)
    }

    pub fn to_block(&self) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        for (i, b) in block.iter_mut().enumerate() {
            *b = self.0[i % STATE_DIM][i / STATE_DIM];
        }
        block
    }

    fn add_round_key(&mut self, round_key: &Block) {
        for (i, k) in round_key.iter().enumerate() {
            self.0[i % STATE_DIM][i / STATE_DIM] ^= k;
        }
    }

    fn sub_bytes(&mut self, table: &[u8; TABLE_SIZE]) {
        for row in self.0.iter_mut() {
            sub_word(row, table);
        }
    }

    /// Row `r` rotates left by `r`.
    fn shift_rows(&mut self) {
        for (r, row) in self.0.iter_mut().enumerate() {
            row.rotate_left(r);
        }
    }

    fn inv_shift_rows(&mut self) {
        for (r, row) in self.0.iter_mut().enumerate() {
            row.rotate_right(r);
        }
    }

    fn mix_columns(&mut self) {
        let s = &mut self.0;
        for c in 0..STATE_DIM {
            let first = s[0][c];
            let all = s[0][c] ^ s[1][c] ^ s[2][c] ^ s[3][c];
            s[0][c] ^= xtime(s[0][c] ^ s[1][c]) ^ all;
            s[1][c] ^= xtime(s[1][c] ^ s[2][c]) ^ all;
            s[2][c] ^= xtime(s[2][c] ^ s[3][c]) ^ all;
            s[3][c] ^= xtime(s[3][c] ^ first) ^ all;
        }
    }

    fn inv_mix_columns(&mut self) {
        let s = &mut self.0;
        for c in 0..STATE_DIM {
            let (a, b, cc, d) = (s[0][c], s[1][c], s[2][c], s[3][c]);
            s[0][c] = gf_mul(a, 0x0e) ^ gf_mul(b, 0x0b) ^ gf_mul(cc, 0x0d) ^ gf_mul(d, 0x09);
            s[1][c] = gf_mul(a, 0x09) ^ gf_mul(b, 0x0e) ^ gf_mul(cc, 0x0b) ^ gf_mul(d, 0x0d);
            s[2][c] = gf_mul(a, 0x0d) ^ gf_mul(b, 0x09) ^ gf_mul(cc, 0x0e) ^ gf_mul(d, 0x0b);
            s[3][c] = gf_mul(a, 0x0b) ^ gf_mul(b, 0x0d) ^ gf_mul(cc, 0x09) ^ gf_mul(d, 0x0e);
        }
    }
}

/// Raw key bytes derived from the user's password.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherKey {
    bytes: [u8; MAX_KEY_BYTES],
    #[zeroize(skip)]
    size: KeySize,
}

impl CipherKey {
    /// Take the password bytes truncated or zero-padded to the key length.
    pub fn from_password(password: &[u8], size: KeySize) -> Self {
        let mut bytes = [0u8; MAX_KEY_BYTES];
        let n = password.len().min(size.bytes());
        bytes[..n].copy_from_slice(&password[..n]);
        Self { bytes, size }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.size.bytes()]
    }

    pub fn schedule(&self) -> KeySchedule {
        KeySchedule::build(self.as_bytes(), self.size)
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherKey")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Expanded round keys; `rounds + 1` of them are meaningful.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeySchedule {
    round_keys: [Block; MAX_ROUNDS + 1],
    #[zeroize(skip)]
    size: KeySize,
}

impl KeySchedule {
    /// Expand `key` into the round keys for `size`.
    ///
    /// # Errors
    ///
    /// Returns `SaesError::Invalid` if `key` is not exactly `size.bytes()` long.
    pub fn expand(key: &[u8], size: KeySize) -> Result<Self, SaesError> {
        if key.len() != size.bytes() {
            return Err(SaesError::Invalid("key length does not match key size"));
        }
        Ok(Self::build(key, size))
    }

    fn build(key: &[u8], size: KeySize) -> Self {
        let nk = size.words();
        let total = STATE_DIM * (size.rounds() + 1);
        let mut words: [Word; MAX_SCHEDULE_WORDS] = [[0; 4]; MAX_SCHEDULE_WORDS];

        for (word, chunk) in words.iter_mut().zip(key.chunks_exact(4)) {
            word.copy_from_slice(chunk);
        }

        for i in nk..total {
            let mut temp = words[i - 1];
            if i % nk == 0 {
                temp.rotate_left(1);
                sub_word(&mut temp, &SBOX);
                temp[0] ^= RCON[i / nk];
            } else if nk > 6 && i % nk == 4 {
                sub_word(&mut temp, &SBOX);
            }
            let prev = words[i - nk];
            for (w, (p, t)) in words[i].iter_mut().zip(prev.iter().zip(temp.iter())) {
                *w = p ^ t;
            }
        }

        let mut round_keys = [[0u8; BLOCK_SIZE]; MAX_ROUNDS + 1];
        for (round_key, group) in round_keys
            .iter_mut()
            .zip(words[..total].chunks_exact(STATE_DIM))
        {
            for (dst, word) in round_key.chunks_exact_mut(4).zip(group) {
                dst.copy_from_slice(word);
            }
        }
        words.zeroize();

        Self { round_keys, size }
    }

    /// Rebuild a schedule from its serialized round keys, as handed to a kernel.
    ///
    /// # Errors
    ///
    /// Returns `SaesError::Invalid` unless `bytes` holds 11, 13 or 15 round keys.
    pub fn from_round_key_bytes(bytes: &[u8]) -> Result<Self, SaesError> {
        let size = KeySize::ALL
            .into_iter()
            .find(|k| (k.rounds() + 1) * BLOCK_SIZE == bytes.len())
            .ok_or(SaesError::Invalid("round key buffer has an unexpected length"))?;
        let mut round_keys = [[0u8; BLOCK_SIZE]; MAX_ROUNDS + 1];
        for (dst, src) in round_keys.iter_mut().zip(bytes.chunks_exact(BLOCK_SIZE)) {
            dst.copy_from_slice(src);
        }
        Ok(Self { round_keys, size })
    }

    /// Serialized round keys, `(rounds + 1) * 16` bytes.
    pub fn round_key_bytes(&self) -> Vec<u8> {
        self.round_keys[..=self.rounds()].concat()
    }

    pub fn key_size(&self) -> KeySize {
        self.size
    }

    pub fn rounds(&self) -> usize {
        self.size.rounds()
    }

    pub fn round_key(&self, round: usize) -> &Block {
        &self.round_keys[round]
    }

    /// Forward transform of one block.
    pub fn encrypt_block(&self, block: &Block) -> Block {
        self.encrypt_block_with(block, &SBOX)
    }

    /// Forward transform using the given substitution table.
    pub fn encrypt_block_with(&self, block: &Block, table: &[u8; TABLE_SIZE]) -> Block {
        let rounds = self.rounds();
        let mut state = State::from_block(block);

        state.add_round_key(&self.round_keys[0]);
        for round in 1..rounds {
            state.sub_bytes(table);
            state.shift_rows();
            state.mix_columns();
            state.add_round_key(&self.round_keys[round]);
        }
        state.sub_bytes(table);
        state.shift_rows();
        state.add_round_key(&self.round_keys[rounds]);

        state.to_block()
    }

    /// Inverse transform of one block.
    ///
    /// Counter mode never needs this; it is kept as a standalone operation.
    pub fn decrypt_block(&self, block: &Block) -> Block {
        let rounds = self.rounds();
        let mut state = State::from_block(block);

        state.add_round_key(&self.round_keys[rounds]);
        for round in (1..rounds).rev() {
            state.inv_shift_rows();
            state.sub_bytes(&INV_SBOX);
            state.add_round_key(&self.round_keys[round]);
            state.inv_mix_columns();
        }
        state.inv_shift_rows();
        state.sub_bytes(&INV_SBOX);
        state.add_round_key(&self.round_keys[0]);

        state.to_block()
    }
}

impl fmt::Debug for KeySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySchedule")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
