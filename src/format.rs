//! On-disk container format: padding, trailer and file names.
//!
//! An encrypted file is laid out as
//!
//! ```text
//! [ciphertext blocks ...][padding slot][extension slot][key length slot]
//! ```
//!
//! Each trailer slot is exactly one block and is stored in cleartext. The
//! trailer has to be read before decryption because the key length it holds
//! is needed to expand the key.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::types::{BLOCK_SIZE, KeySize, SaesError};

/// Extension given to encrypted files.
pub const SAES_EXTENSION: &str = ".saes";

/// Number of trailer slots.
pub const TRAILER_SLOTS: usize = 3;

/// Trailer length in bytes.
pub const TRAILER_LEN: usize = TRAILER_SLOTS * BLOCK_SIZE;

/// Longest original extension (dot included) that fits its slot.
pub const MAX_EXTENSION_LEN: usize = BLOCK_SIZE;

/// Padding needed to reach a whole number of blocks; zero when already aligned.
pub fn padding_len(input_len: u64) -> u8 {
    let block = BLOCK_SIZE as u64;
    ((block - input_len % block) % block) as u8
}

/// Input length rounded up to whole blocks.
pub fn padded_len(input_len: u64) -> u64 {
    input_len + u64::from(padding_len(input_len))
}

/// Whether `extension` is a single file-name suffix: one leading `.`, no
/// further dots, no path separators and no NUL.
///
/// The trailer is cleartext, so anything read from it goes through this
/// before it becomes part of a path.
pub fn is_plain_extension(extension: &str) -> bool {
    match extension.strip_prefix('.') {
        Some(rest) => !rest.contains(['.', '/', '\\', '\0']),
        None => false,
    }
}

/// Metadata appended after the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    /// Bytes of padding in the last ciphertext block.
    pub padding: u8,
    /// Original extension including the leading dot.
    pub extension: String,
    pub key_size: KeySize,
}

impl Trailer {
    pub fn new(padding: u8, extension: impl Into<String>, key_size: KeySize) -> Result<Self, SaesError> {
        let trailer = Self {
            padding,
            extension: extension.into(),
            key_size,
        };
        if usize::from(trailer.padding) >= BLOCK_SIZE {
            return Err(SaesError::Invalid("padding must be smaller than a block"));
        }
        if trailer.extension.len() > MAX_EXTENSION_LEN {
            return Err(SaesError::Format("extension does not fit the trailer"));
        }
        if !is_plain_extension(&trailer.extension) {
            return Err(SaesError::Format("extension is not a plain file-name suffix"));
        }
        Ok(trailer)
    }

    pub fn to_bytes(&self) -> [u8; TRAILER_LEN] {
        let mut out = [0u8; TRAILER_LEN];
        let (padding, rest) = out.split_at_mut(BLOCK_SIZE);
        let (extension, key_len) = rest.split_at_mut(BLOCK_SIZE);

        padding[0] = self.padding;
        let ext = self.extension.as_bytes();
        extension[..ext.len()].copy_from_slice(ext);
        key_len[..2].copy_from_slice(&self.key_size.bits().to_le_bytes());
        out
    }

    /// Decode the three slots.
    ///
    /// # Errors
    ///
    /// Returns `SaesError::Malformed` on an out-of-range padding, an unknown
    /// key length, or an extension that is not UTF-8 or not a plain suffix.
    pub fn parse(bytes: &[u8; TRAILER_LEN]) -> Result<Self, SaesError> {
        let (padding, rest) = bytes.split_at(BLOCK_SIZE);
        let (extension, key_len) = rest.split_at(BLOCK_SIZE);

        let padding = padding[0];
        if usize::from(padding) >= BLOCK_SIZE {
            return Err(SaesError::Malformed("padding length out of range"));
        }

        let ext_len = extension.iter().position(|&b| b == 0).unwrap_or(BLOCK_SIZE);
        let extension = std::str::from_utf8(&extension[..ext_len])
            .map_err(|_| SaesError::Malformed("extension is not UTF-8"))?
            .to_owned();
        if !is_plain_extension(&extension) {
            return Err(SaesError::Malformed("extension is not a plain file-name suffix"));
        }

        let bits = u16::from_le_bytes([key_len[0], key_len[1]]);
        let key_size =
            KeySize::from_bits(bits).ok_or(SaesError::Malformed("unsupported key length"))?;

        Ok(Self {
            padding,
            extension,
            key_size,
        })
    }
}

/// Read the trailer of a container `file_len` bytes long.
///
/// Every slot is read separately from its fixed offset back from the end.
pub fn read_trailer<R: Read + Seek>(reader: &mut R, file_len: u64) -> Result<Trailer, SaesError> {
    let min_len = (TRAILER_LEN + BLOCK_SIZE) as u64;
    if file_len < min_len {
        return Err(SaesError::Malformed("file too short for a trailer"));
    }
    let payload = file_len - TRAILER_LEN as u64;
    if payload % BLOCK_SIZE as u64 != 0 {
        return Err(SaesError::Malformed("ciphertext is not a whole number of blocks"));
    }

    let mut bytes = [0u8; TRAILER_LEN];
    for (slot, dst) in bytes.chunks_exact_mut(BLOCK_SIZE).enumerate() {
        let offset = file_len - (BLOCK_SIZE * (TRAILER_SLOTS - slot)) as u64;
        reader.seek(SeekFrom::Start(offset))?;
        read_slot(reader, dst)?;
    }
    reader.seek(SeekFrom::Start(0))?;

    Trailer::parse(&bytes)
}

fn read_slot<R: Read>(reader: &mut R, dst: &mut [u8]) -> Result<(), SaesError> {
    let mut filled = 0;
    while filled < dst.len() {
        match reader.read(&mut dst[filled..])? {
            0 => return Err(SaesError::Malformed("short read in trailer")),
            n => filled += n,
        }
    }
    Ok(())
}

/// Plaintext length recovered from a container.
pub fn plaintext_len(container_len: u64, trailer: &Trailer) -> Result<u64, SaesError> {
    container_len
        .checked_sub(TRAILER_LEN as u64 + u64::from(trailer.padding))
        .filter(|&n| n > 0)
        .ok_or(SaesError::Malformed("padding exceeds ciphertext"))
}

fn split_name(path: &Path) -> Result<(&str, &str), SaesError> {
    let name = path
        .file_name()
        .ok_or(SaesError::Format("path has no file name"))?
        .to_str()
        .ok_or(SaesError::Format("file name is not UTF-8"))?;
    let dot = name
        .rfind('.')
        .ok_or(SaesError::Format("cannot find '.' in file name"))?;
    Ok(name.split_at(dot))
}

/// Output path for encryption and the original extension to store.
///
/// Everything from the last `.` of the file name is replaced by [`SAES_EXTENSION`].
pub fn encrypted_path(path: &Path) -> Result<(PathBuf, String), SaesError> {
    let (stem, extension) = split_name(path)?;
    if extension.len() > MAX_EXTENSION_LEN {
        return Err(SaesError::Format("extension does not fit the trailer"));
    }
    if !is_plain_extension(extension) {
        return Err(SaesError::Format("extension is not a plain file-name suffix"));
    }
    let out = path.with_file_name(format!("{stem}{SAES_EXTENSION}"));
    Ok((out, extension.to_owned()))
}

/// Output path for decryption, restoring `extension` from the trailer.
pub fn decrypted_path(path: &Path, extension: &str) -> Result<PathBuf, SaesError> {
    if !is_plain_extension(extension) {
        return Err(SaesError::Format("extension is not a plain file-name suffix"));
    }
    let (stem, _) = split_name(path)?;
    Ok(path.with_file_name(format!("{stem}{extension}")))
}
