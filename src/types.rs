//! Core types, constants and the library error type.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Cipher block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Default host buffer size for the chunked CPU path (1 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

/// A single cipher block.
pub type Block = [u8; BLOCK_SIZE];

/// Supported key sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeySize {
    #[default]
    Aes128,
    Aes192,
    Aes256,
}

impl KeySize {
    pub const ALL: [KeySize; 3] = [KeySize::Aes128, KeySize::Aes192, KeySize::Aes256];

    /// Parse a key length given in bits.
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            128 => Some(Self::Aes128),
            192 => Some(Self::Aes192),
            256 => Some(Self::Aes256),
            _ => None,
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            Self::Aes128 => 128,
            Self::Aes192 => 192,
            Self::Aes256 => 256,
        }
    }

    pub fn bytes(self) -> usize {
        usize::from(self.bits()) / 8
    }

    /// Number of 32-bit words in the key.
    pub fn words(self) -> usize {
        self.bytes() / 4
    }

    /// Number of cipher rounds (10, 12 or 14).
    pub fn rounds(self) -> usize {
        self.words() + 6
    }
}

impl fmt::Display for KeySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// File-level operation requested by the caller.
///
/// Only encryption takes a key size; decryption reads it from the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Encrypt(KeySize),
    Decrypt,
}

/// Options shared by every file of a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Never try to bring up the compute backend.
    pub force_cpu: bool,
    /// Host buffer size of the chunked CPU path; must be a positive multiple of [`BLOCK_SIZE`].
    pub buffer_size: usize,
    /// When `true`, replace an existing output file instead of failing.
    pub overwrite: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            force_cpu: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            overwrite: false,
        }
    }
}

impl RunOptions {
    pub fn with_force_cpu(mut self, on: bool) -> Self {
        self.force_cpu = on;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_overwrite(mut self, on: bool) -> Self {
        self.overwrite = on;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), SaesError> {
        if self.buffer_size == 0 || self.buffer_size % BLOCK_SIZE != 0 {
            return Err(SaesError::Invalid(
                "buffer size must be a positive multiple of the block size",
            ));
        }
        Ok(())
    }
}

/// Failure reported by a compute backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("compute backend: {0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Coarse classification of [`SaesError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    File,
    Backend,
    Format,
    Invalid,
}

/// Library error type (no panics for expected failures).
#[derive(Error, Debug)]
pub enum SaesError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("cannot encrypt or decrypt an empty file")]
    EmptyFile,
    #[error("malformed container: {0}")]
    Malformed(&'static str),
    #[error("output {} exists; use --overwrite to replace it", .0.display())]
    OutputExists(PathBuf),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("file name: {0}")]
    Format(&'static str),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

impl SaesError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::EmptyFile | Self::Malformed(_) | Self::OutputExists(_) => {
                ErrorKind::File
            }
            Self::Backend(_) => ErrorKind::Backend,
            Self::Format(_) => ErrorKind::Format,
            Self::Invalid(_) => ErrorKind::Invalid,
        }
    }
}
