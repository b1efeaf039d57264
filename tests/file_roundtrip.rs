use std::fs;
use std::path::{Path, PathBuf};

use saes_file::{
    BLOCK_SIZE, ErrorKind, ExecutionMode, KeySize, Operation, ParallelDevice, RunOptions,
    SaesError, TRAILER_LEN, decrypt_file, encrypt_bytes, encrypt_file, run,
};
use secrecy::SecretString;
use tempfile::tempdir;

fn pw() -> SecretString {
    SecretString::new("correct horse".into())
}

fn write_blob(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let p = dir.join(name);
    fs::write(&p, data).unwrap();
    p
}

fn slurp(p: &Path) -> Vec<u8> {
    fs::read(p).unwrap()
}

fn device() -> ExecutionMode {
    ExecutionMode::Gpu(Box::new(ParallelDevice::with_threads(2).unwrap()))
}

#[test]
fn round_trip_all_key_sizes_and_paddings() {
    let dir = tempdir().unwrap();
    let opts = RunOptions::default().with_buffer_size(48);

    for size in KeySize::ALL {
        // 64 bytes: padding 0; 49 bytes: padding 15
        for len in [64usize, 49] {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();
            let input = write_blob(dir.path(), "sample.bin", &data);
            let mut mode = ExecutionMode::CpuOnly;

            let enc = encrypt_file(&input, &pw(), size, &mut mode, &opts).unwrap();
            let expected_len = len.div_ceil(16) * 16 + TRAILER_LEN;
            assert_eq!(slurp(&enc).len(), expected_len);
            assert_eq!(slurp(&enc)[expected_len - TRAILER_LEN], (16 - len % 16) as u8 % 16);

            let dec = decrypt_file(&enc, &pw(), &mut mode, &opts).unwrap();
            assert_eq!(dec, input);
            assert_eq!(slurp(&dec), data, "{size} with {len} bytes");
            fs::remove_file(&dec).unwrap();
        }
    }
}

#[test]
fn cpu_and_device_write_identical_files() {
    let cpu_dir = tempdir().unwrap();
    let dev_dir = tempdir().unwrap();
    let data: Vec<u8> = (0..100_003u32).map(|i| (i % 253) as u8).collect();
    let opts = RunOptions::default().with_buffer_size(1024);

    let a = write_blob(cpu_dir.path(), "big.iso", &data);
    let b = write_blob(dev_dir.path(), "big.iso", &data);
    let enc_a = encrypt_file(&a, &pw(), KeySize::Aes256, &mut ExecutionMode::CpuOnly, &opts).unwrap();
    let enc_b = encrypt_file(&b, &pw(), KeySize::Aes256, &mut device(), &opts).unwrap();
    assert_eq!(slurp(&enc_a), slurp(&enc_b));

    // Decrypt across paths too.
    let dec = decrypt_file(&enc_a, &pw(), &mut device(), &opts).unwrap();
    assert_eq!(slurp(&dec), data);
}

#[test]
fn buffer_multiple_of_output_size() {
    // 32 bytes of input and 32-byte buffers: the last buffer is full.
    let dir = tempdir().unwrap();
    let data = [0xc3u8; 32];
    let input = write_blob(dir.path(), "even.raw", &data);
    let opts = RunOptions::default().with_buffer_size(32);
    let mut mode = ExecutionMode::CpuOnly;

    let enc = encrypt_file(&input, &pw(), KeySize::Aes128, &mut mode, &opts).unwrap();
    let dec = decrypt_file(&enc, &pw(), &mut mode, &opts).unwrap();
    assert_eq!(slurp(&dec), data);
}

#[test]
fn empty_file_is_a_file_error() {
    let dir = tempdir().unwrap();
    let input = write_blob(dir.path(), "empty.txt", b"");
    let err = encrypt_file(
        &input,
        &pw(),
        KeySize::Aes128,
        &mut ExecutionMode::CpuOnly,
        &RunOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, SaesError::EmptyFile));
    assert_eq!(err.kind(), ErrorKind::File);
    assert!(input.exists());
    assert!(!dir.path().join("empty.saes").exists());
}

#[test]
fn empty_container_is_a_file_error() {
    let dir = tempdir().unwrap();
    let input = write_blob(dir.path(), "empty.saes", b"");
    let err = decrypt_file(
        &input,
        &pw(),
        &mut ExecutionMode::CpuOnly,
        &RunOptions::default().with_overwrite(true),
    )
    .unwrap_err();
    assert!(matches!(err, SaesError::EmptyFile));
    assert_eq!(err.kind(), ErrorKind::File);
    assert!(input.exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn trailer_extension_cannot_leave_the_directory() {
    let root = tempdir().unwrap();
    let inbox = root.path().join("inbox");
    fs::create_dir(&inbox).unwrap();

    let opts = RunOptions::default().with_overwrite(true);
    let mut mode = ExecutionMode::CpuOnly;
    let mut container = encrypt_bytes(b"payload", ".txt", &pw(), KeySize::Aes128, &mut mode, &opts)
        .unwrap();
    let ext_slot = container.len() - TRAILER_LEN + BLOCK_SIZE;
    let evil = b"/../../escaped";
    container[ext_slot..ext_slot + BLOCK_SIZE].fill(0);
    container[ext_slot..ext_slot + evil.len()].copy_from_slice(evil);
    let input = write_blob(&inbox, "sub.saes", &container);

    let err = decrypt_file(&input, &pw(), &mut mode, &opts).unwrap_err();
    assert!(matches!(err, SaesError::Malformed(_)));
    assert!(input.exists());
    assert!(!root.path().join("escaped").exists());
    assert_eq!(fs::read_dir(&inbox).unwrap().count(), 1);
}

#[test]
fn missing_input_is_a_file_error() {
    let dir = tempdir().unwrap();
    let err = decrypt_file(
        &dir.path().join("nope.saes"),
        &pw(),
        &mut ExecutionMode::CpuOnly,
        &RunOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::File);
}

#[test]
fn several_dots_use_the_last_one() {
    let dir = tempdir().unwrap();
    let input = write_blob(dir.path(), "backup.2024.tar.gz", b"archive bytes");
    let mut mode = ExecutionMode::CpuOnly;
    let opts = RunOptions::default();

    let enc = encrypt_file(&input, &pw(), KeySize::Aes192, &mut mode, &opts).unwrap();
    assert_eq!(enc, dir.path().join("backup.2024.tar.saes"));
    let dec = decrypt_file(&enc, &pw(), &mut mode, &opts).unwrap();
    assert_eq!(dec, input);
    assert_eq!(slurp(&dec), b"archive bytes");
}

#[test]
fn garbage_trailer_is_rejected_and_input_kept() {
    let dir = tempdir().unwrap();
    let mut bogus = vec![0u8; 64];
    bogus[16] = 99; // padding slot
    let input = write_blob(dir.path(), "bogus.saes", &bogus);

    let err = decrypt_file(&input, &pw(), &mut ExecutionMode::CpuOnly, &RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, SaesError::Malformed(_)));
    assert!(input.exists());
}

#[test]
fn run_encrypts_then_decrypts_a_batch() {
    let dir = tempdir().unwrap();
    let files = vec![
        write_blob(dir.path(), "a.txt", b"alpha"),
        write_blob(dir.path(), "b.md", b"bravo bravo bravo"),
        write_blob(dir.path(), "c.json", b"{}"),
    ];
    let opts = RunOptions::default();
    let mut mode = device();

    let encrypted = run(Operation::Encrypt(KeySize::Aes256), &files, &pw(), &opts, &mut mode).unwrap();
    assert_eq!(encrypted.len(), 3);
    assert!(files.iter().all(|f| !f.exists()));

    let decrypted = run(Operation::Decrypt, &encrypted, &pw(), &opts, &mut mode).unwrap();
    assert_eq!(decrypted, files);
    assert_eq!(slurp(&files[1]), b"bravo bravo bravo");
}
