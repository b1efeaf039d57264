//! Batch driver: applies one operation to a list of files.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use tracing::{error, info};

use crate::device::ExecutionMode;
use crate::file::{decrypt_file, encrypt_file};
use crate::types::{Operation, RunOptions, SaesError};

/// Process `files` one at a time, in order, with a shared execution mode.
///
/// The first failure stops the run; files already processed stay processed.
/// Returns the output paths written.
pub fn run(
    operation: Operation,
    files: &[PathBuf],
    password: &SecretString,
    opts: &RunOptions,
    mode: &mut ExecutionMode,
) -> Result<Vec<PathBuf>, SaesError> {
    opts.validate()?;
    info!(files = files.len(), ?operation, ?mode, "starting run");

    let mut outputs = Vec::with_capacity(files.len());
    for path in files {
        match process(operation, path, password, opts, mode) {
            Ok(out) => outputs.push(out),
            Err(e) => {
                error!(file = %path.display(), error = %e, "aborting run");
                return Err(e);
            }
        }
    }
    Ok(outputs)
}

fn process(
    operation: Operation,
    path: &Path,
    password: &SecretString,
    opts: &RunOptions,
    mode: &mut ExecutionMode,
) -> Result<PathBuf, SaesError> {
    match operation {
        Operation::Encrypt(key_size) => encrypt_file(path, password, key_size, mode, opts),
        Operation::Decrypt => decrypt_file(path, password, mode, opts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeySize;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn stops_at_first_failure() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("one.txt");
        let bad = dir.path().join("two.txt");
        let last = dir.path().join("three.txt");
        fs::write(&first, b"first").unwrap();
        fs::write(&bad, b"").unwrap();
        fs::write(&last, b"last").unwrap();

        let pw = SecretString::new("pw".to_owned().into_boxed_str());
        let mut mode = ExecutionMode::CpuOnly;
        let res = run(
            Operation::Encrypt(KeySize::Aes128),
            &[first.clone(), bad.clone(), last.clone()],
            &pw,
            &RunOptions::default(),
            &mut mode,
        );

        assert!(matches!(res, Err(SaesError::EmptyFile)));
        assert!(dir.path().join("one.saes").exists());
        assert!(!first.exists());
        assert!(bad.exists());
        assert!(last.exists());
        assert!(!dir.path().join("three.saes").exists());
    }

    #[test]
    fn invalid_buffer_size_fails_before_any_file() {
        let dir = tempdir().unwrap();
        let f = dir.path().join("x.txt");
        fs::write(&f, b"data").unwrap();
        let pw = SecretString::new("pw".to_owned().into_boxed_str());
        let opts = RunOptions::default().with_buffer_size(10);
        let res = run(Operation::Decrypt, &[f.clone()], &pw, &opts, &mut ExecutionMode::CpuOnly);
        assert!(matches!(res, Err(SaesError::Invalid(_))));
        assert!(f.exists());
    }
}
