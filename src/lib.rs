#![forbid(unsafe_code)]
//! # saes_file: SAES counter-mode encryption for files.
//!
//! `saes_file` encrypts and decrypts files or byte arrays with the SAES block
//! cipher (the 128-bit Rijndael block with 128, 192 or 256-bit keys) in
//! counter mode. Keystream is produced either by a data-parallel compute
//! backend in one dispatch per file, or by a chunked sequential CPU path. Both
//! paths produce identical bytes.
//!
//! ## Features
//! - **File and byte array encryption/decryption**
//! - **Three key sizes**, recorded in a cleartext trailer so decryption needs only the password
//! - **Original extension restored** on decryption
//! - **Pluggable compute backend** with automatic CPU fallback
//!
//! ## Example: Encrypt and decrypt a byte array
//! ```no_run
//! use saes_file::{ExecutionMode, KeySize, RunOptions, decrypt_bytes, encrypt_bytes};
//! use secrecy::SecretString;
//!
//! let password = SecretString::new("mypassword".into());
//! let opts = RunOptions::default();
//! let mut mode = ExecutionMode::detect(opts.force_cpu);
//!
//! let container =
//!     encrypt_bytes(b"Hello, world!", ".txt", &password, KeySize::Aes256, &mut mode, &opts).unwrap();
//! let (plaintext, ext) = decrypt_bytes(&container, &password, &mut mode, &opts).unwrap();
//! assert_eq!(plaintext, b"Hello, world!");
//! assert_eq!(ext, ".txt");
//! ```
//!
//! Safety notes
//! - The key is the raw password and the nonce is derived from it, so every
//!   file encrypted with one password shares a keystream.
//! - There is no authentication: tampering goes undetected.
//! - Do not use this for anything important.

mod cipher;
mod ctr;
mod device;
mod file;
mod format;
mod run;
mod streaming;
mod tables;
mod types;

pub use cipher::{CipherKey, KeySchedule, State};
pub use self::ctr::{Keystream, NONCE_SIZE, Nonce, PasswordBlock, counter_block, derive_nonce};
pub use device::{
    AccessMode, BufferHandle, ComputeBackend, ExecutionMode, ParallelDevice, SLOT_BLOCKS,
    SLOT_ROUND_KEYS, SLOT_SBOX, dispatch_keystream,
};
pub use file::{decrypt_bytes, decrypt_file, decrypt_stream, encrypt_bytes, encrypt_file, encrypt_stream};
pub use format::{
    MAX_EXTENSION_LEN, SAES_EXTENSION, TRAILER_LEN, Trailer, decrypted_path, encrypted_path,
    is_plain_extension, padding_len, read_trailer,
};
pub use run::run;
pub use streaming::TransformPlan;
pub use tables::{INV_SBOX, SBOX};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn cpu_and_device_agree() {
        let pw = SecretString::new("pw".into());
        let opts = RunOptions::default().with_buffer_size(64);
        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();

        let mut cpu = ExecutionMode::CpuOnly;
        let mut gpu = ExecutionMode::Gpu(Box::new(ParallelDevice::with_threads(2).unwrap()));
        let a = encrypt_bytes(&data, ".bin", &pw, KeySize::Aes128, &mut cpu, &opts).unwrap();
        let b = encrypt_bytes(&data, ".bin", &pw, KeySize::Aes128, &mut gpu, &opts).unwrap();
        assert_eq!(a, b);

        let (pt, _) = decrypt_bytes(&b, &pw, &mut cpu, &opts).unwrap();
        assert_eq!(pt, data);
    }

    #[test]
    fn wrong_password_gives_garbage_not_error() {
        let opts = RunOptions::default();
        let mut mode = ExecutionMode::CpuOnly;
        let ct = encrypt_bytes(
            b"data",
            ".txt",
            &SecretString::new("pw1".into()),
            KeySize::Aes128,
            &mut mode,
            &opts,
        )
        .unwrap();
        let (pt, _) = decrypt_bytes(&ct, &SecretString::new("pw2".into()), &mut mode, &opts).unwrap();
        assert_ne!(pt, b"data");
    }
}
