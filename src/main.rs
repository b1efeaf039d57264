#![forbid(unsafe_code)]
//! `saes`: encrypt or decrypt files in place with SAES in counter mode.

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use saes_file::{DEFAULT_BUFFER_SIZE, ExecutionMode, KeySize, Operation, RunOptions, run};
use secrecy::SecretString;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "saes",
    version,
    about = "Encrypt/decrypt files with SAES in counter mode"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt files; each FILE.ext is replaced by FILE.saes
    Enc(EncArgs),
    /// Decrypt .saes files, restoring the original extension
    Dec(CommonArgs),
}

#[derive(Args, Debug)]
struct EncArgs {
    /// Key length in bits
    #[arg(short = 'k', long = "key-bits", value_enum, default_value_t = KeyBits::K128)]
    key_bits: KeyBits,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Files to process, in order; the first failure stops the run
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Password given on the command line (visible to other users; prefer --password-file)
    #[arg(short = 'p', long, conflicts_with = "password_file")]
    password: Option<String>,

    /// Read password from file instead of interactive prompt
    #[arg(long = "password-file")]
    password_file: Option<PathBuf>,

    /// Skip the compute device and use the chunked CPU path
    #[arg(long)]
    cpu: bool,

    /// Overwrite output files that already exist
    #[arg(short = 'f', long)]
    overwrite: bool,

    /// Buffer size of the CPU path in bytes (multiple of 16). Default: 1 MiB.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum KeyBits {
    #[value(name = "128")]
    K128,
    #[value(name = "192")]
    K192,
    #[value(name = "256")]
    K256,
}

impl From<KeyBits> for KeySize {
    fn from(v: KeyBits) -> Self {
        match v {
            KeyBits::K128 => KeySize::Aes128,
            KeyBits::K192 => KeySize::Aes192,
            KeyBits::K256 => KeySize::Aes256,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Enc(a) => execute(Operation::Encrypt(a.key_bits.into()), a.common),
        Command::Dec(a) => execute(Operation::Decrypt, a),
    }
}

fn read_password(args: &mut CommonArgs) -> Result<SecretString> {
    if let Some(pw) = args.password.take() {
        return Ok(SecretString::new(pw.into_boxed_str()));
    }
    if let Some(path) = &args.password_file {
        let mut s = String::new();
        fs::File::open(path)
            .with_context(|| format!("cannot open password file {}", path.display()))?
            .read_to_string(&mut s)?;

        let secret = SecretString::new(
            s.trim_end_matches(&['\r', '\n'][..])
                .to_owned()
                .into_boxed_str(),
        );

        use zeroize::Zeroize;
        s.zeroize();
        Ok(secret)
    } else {
        let pw = rpassword::prompt_password("Password: ")?;
        Ok(SecretString::new(pw.into_boxed_str()))
    }
}

fn execute(operation: Operation, mut args: CommonArgs) -> Result<()> {
    let password = read_password(&mut args)?;
    let opts = RunOptions::default()
        .with_force_cpu(args.cpu)
        .with_buffer_size(args.buffer_size)
        .with_overwrite(args.overwrite);

    let mut mode = ExecutionMode::detect(opts.force_cpu);
    let outputs = run(operation, &args.files, &password, &opts, &mut mode).with_context(|| {
        match operation {
            Operation::Encrypt(_) => "encryption failed",
            Operation::Decrypt => "decryption failed",
        }
    })?;

    for out in outputs {
        eprintln!("Wrote {}", out.display());
    }
    Ok(())
}
