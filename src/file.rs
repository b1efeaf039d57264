//! File-level encryption and decryption.
//!
//! Outputs are written into a [`NamedTempFile`] next to their final location
//! and persisted once complete. The input file is removed only after the
//! output has been persisted.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use secrecy::{ExposeSecret, SecretString};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::cipher::{CipherKey, KeySchedule};
use crate::ctr::{Keystream, Nonce, PasswordBlock, derive_nonce};
use crate::device::{ExecutionMode, transform_whole};
use crate::format::{
    Trailer, TRAILER_LEN, decrypted_path, encrypted_path, padded_len, padding_len, plaintext_len,
    read_trailer,
};
use crate::streaming::{TransformPlan, transform_chunked};
use crate::types::{KeySize, RunOptions, SaesError};

fn key_material(password: &SecretString, key_size: KeySize) -> (KeySchedule, Nonce) {
    let pw = password.expose_secret().as_bytes();
    let nonce = derive_nonce(&PasswordBlock::new(pw));
    let schedule = CipherKey::from_password(pw, key_size).schedule();
    (schedule, nonce)
}

fn transform<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    keystream: &Keystream<'_>,
    plan: TransformPlan,
    mode: &mut ExecutionMode,
) -> Result<(), SaesError> {
    match mode {
        ExecutionMode::Gpu(backend) => {
            transform_whole(backend.as_mut(), reader, writer, keystream, plan)
        }
        ExecutionMode::CpuOnly => transform_chunked(reader, writer, keystream, plan),
    }
}

/// Encrypt `input_len` bytes from `reader` and write ciphertext plus trailer.
///
/// # Errors
///
/// `SaesError::EmptyFile` when `input_len` is zero, before any cipher work.
#[allow(clippy::too_many_arguments)]
pub fn encrypt_stream<R: Read, W: Write>(
    reader: &mut R,
    input_len: u64,
    writer: &mut W,
    extension: &str,
    password: &SecretString,
    key_size: KeySize,
    mode: &mut ExecutionMode,
    opts: &RunOptions,
) -> Result<Trailer, SaesError> {
    opts.validate()?;
    if input_len == 0 {
        return Err(SaesError::EmptyFile);
    }
    let trailer = Trailer::new(padding_len(input_len), extension, key_size)?;

    let (schedule, nonce) = key_material(password, key_size);
    let keystream = Keystream::new(&schedule, nonce);
    let plan = TransformPlan {
        input_len,
        output_len: padded_len(input_len),
        buffer_size: opts.buffer_size,
    };
    transform(reader, writer, &keystream, plan, mode)?;
    writer.write_all(&trailer.to_bytes())?;
    debug!(input_len, padding = trailer.padding, key = %key_size, "encrypted stream");
    Ok(trailer)
}

/// Decrypt a container of `container_len` bytes.
///
/// The trailer is read first; it selects the key size and tells how many
/// plaintext bytes to emit.
pub fn decrypt_stream<R: Read + Seek, W: Write>(
    reader: &mut R,
    container_len: u64,
    writer: &mut W,
    password: &SecretString,
    mode: &mut ExecutionMode,
    opts: &RunOptions,
) -> Result<Trailer, SaesError> {
    opts.validate()?;
    let trailer = read_trailer(reader, container_len)?;
    decrypt_payload(reader, container_len, &trailer, writer, password, mode, opts)?;
    Ok(trailer)
}

fn decrypt_payload<R: Read, W: Write>(
    reader: &mut R,
    container_len: u64,
    trailer: &Trailer,
    writer: &mut W,
    password: &SecretString,
    mode: &mut ExecutionMode,
    opts: &RunOptions,
) -> Result<(), SaesError> {
    let output_len = plaintext_len(container_len, trailer)?;
    let (schedule, nonce) = key_material(password, trailer.key_size);
    let keystream = Keystream::new(&schedule, nonce);
    let plan = TransformPlan {
        input_len: container_len - TRAILER_LEN as u64,
        output_len,
        buffer_size: opts.buffer_size,
    };
    transform(reader, writer, &keystream, plan, mode)?;
    debug!(output_len, key = %trailer.key_size, "decrypted stream");
    Ok(())
}

/// Encrypt an in-memory buffer into a complete container.
pub fn encrypt_bytes(
    data: &[u8],
    extension: &str,
    password: &SecretString,
    key_size: KeySize,
    mode: &mut ExecutionMode,
    opts: &RunOptions,
) -> Result<Vec<u8>, SaesError> {
    let mut out = Vec::with_capacity(padded_len(data.len() as u64) as usize + TRAILER_LEN);
    let mut reader = data;
    encrypt_stream(
        &mut reader,
        data.len() as u64,
        &mut out,
        extension,
        password,
        key_size,
        mode,
        opts,
    )?;
    Ok(out)
}

/// Decrypt an in-memory container; returns the plaintext and the stored extension.
pub fn decrypt_bytes(
    container: &[u8],
    password: &SecretString,
    mode: &mut ExecutionMode,
    opts: &RunOptions,
) -> Result<(Vec<u8>, String), SaesError> {
    let mut out = Vec::new();
    let trailer = decrypt_stream(
        &mut Cursor::new(container),
        container.len() as u64,
        &mut out,
        password,
        mode,
        opts,
    )?;
    Ok((out, trailer.extension))
}

/// Encrypt `input` to `<stem>.saes` next to it and delete `input`.
///
/// # Errors
///
/// - `SaesError::Format` if the file name has no extension, or if the output
///   name is the input itself (`x.saes`), with or without `opts.overwrite`.
/// - `SaesError::EmptyFile` for a zero-length input.
/// - `SaesError::OutputExists` if the output exists and `opts.overwrite` is off.
pub fn encrypt_file(
    input: &Path,
    password: &SecretString,
    key_size: KeySize,
    mode: &mut ExecutionMode,
    opts: &RunOptions,
) -> Result<PathBuf, SaesError> {
    opts.validate()?;
    let (out, extension) = encrypted_path(input)?;
    let started = Instant::now();

    let file = File::open(input)?;
    let input_len = file.metadata()?.len();
    if input_len == 0 {
        return Err(SaesError::EmptyFile);
    }
    ensure_writable(input, &out, opts)?;

    let mut reader = BufReader::new(file);
    let tmp = write_temp(&out, |w| {
        encrypt_stream(
            &mut reader,
            input_len,
            w,
            &extension,
            password,
            key_size,
            mode,
            opts,
        )
        .map(drop)
    })?;
    persist_output(tmp, &out, opts.overwrite)?;
    drop(reader);
    fs::remove_file(input)?;

    info!(
        input = %input.display(),
        output = %out.display(),
        bytes = input_len,
        key = %key_size,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "encrypted"
    );
    Ok(out)
}

/// Decrypt `input`, restore its original extension and delete `input`.
///
/// # Errors
///
/// As [`encrypt_file`], plus `SaesError::Malformed` for a damaged trailer.
pub fn decrypt_file(
    input: &Path,
    password: &SecretString,
    mode: &mut ExecutionMode,
    opts: &RunOptions,
) -> Result<PathBuf, SaesError> {
    opts.validate()?;
    let started = Instant::now();

    let file = File::open(input)?;
    let container_len = file.metadata()?.len();
    if container_len == 0 {
        return Err(SaesError::EmptyFile);
    }
    let mut reader = BufReader::new(file);
    let trailer = read_trailer(&mut reader, container_len)?;
    let out = decrypted_path(input, &trailer.extension)?;
    ensure_writable(input, &out, opts)?;

    let tmp = write_temp(&out, |w| {
        decrypt_payload(
            &mut reader,
            container_len,
            &trailer,
            w,
            password,
            mode,
            opts,
        )
    })?;
    persist_output(tmp, &out, opts.overwrite)?;
    drop(reader);
    fs::remove_file(input)?;

    info!(
        input = %input.display(),
        output = %out.display(),
        bytes = container_len,
        key = %trailer.key_size,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "decrypted"
    );
    Ok(out)
}

/// Refuse an output that is the input itself, then apply the overwrite policy.
fn ensure_writable(input: &Path, out: &Path, opts: &RunOptions) -> Result<(), SaesError> {
    if out == input || (out.exists() && fs::canonicalize(out)? == fs::canonicalize(input)?) {
        return Err(SaesError::Format("output would replace the input file"));
    }
    if out.exists() && !opts.overwrite {
        return Err(SaesError::OutputExists(out.to_path_buf()));
    }
    Ok(())
}

/// Run `body` against a buffered temp file in the directory of `out`, then flush and sync it.
fn write_temp<F>(out: &Path, body: F) -> Result<NamedTempFile, SaesError>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> Result<(), SaesError>,
{
    let dir = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        body(&mut writer)?;
        writer.flush()?;
    }
    tmp.as_file_mut().sync_all()?;
    Ok(tmp)
}

/// Move the finished temp file into place.
///
/// Without `overwrite` the rename refuses to clobber a file that appeared
/// since [`ensure_writable`] ran.
fn persist_output(tmp: NamedTempFile, out: &Path, overwrite: bool) -> Result<(), SaesError> {
    let persisted = if overwrite {
        tmp.persist(out)
    } else {
        tmp.persist_noclobber(out)
    };
    persisted.map(drop).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            SaesError::OutputExists(out.to_path_buf())
        } else {
            SaesError::Io(e.error)
        }
    })
}
