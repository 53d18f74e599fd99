//! mpad - file encryption with the Mumblepad block cipher.
//!
//! Encrypted files are named `<original>.mu<code>` where the code 1-6
//! identifies the block size; a recognized extension on a decrypt input
//! also selects the block size, so `mpad decrypt -i notes.txt.mu4 -k key`
//! needs no other flags.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use mumblepad::engine::{
    block_type_from_file_name, encrypted_file_name, parse_encrypted_file_name,
};
use mumblepad::{BlockType, Engine, EngineType};

#[derive(Parser)]
#[command(
    name = "mpad",
    version,
    about = "Encrypt or decrypt files with the Mumblepad block cipher"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encrypt a file
    Encrypt(JobArgs),
    /// Decrypt a file
    Decrypt(JobArgs),
}

#[derive(Args)]
struct JobArgs {
    /// Input file
    #[arg(short, long)]
    input: PathBuf,

    /// Output file; derived from the input name when omitted (encrypt
    /// appends the .mu extension, decrypt strips it)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Key file; the first 4096 bytes are used
    #[arg(short, long)]
    key: PathBuf,

    /// Execution engine
    #[arg(short, long, value_enum, default_value = "cpu")]
    engine: EngineArg,

    /// Block size in bytes: 128, 256, 512, 1024, 2048, or 4096
    #[arg(short, long)]
    block: Option<u32>,

    /// Worker threads for the mt engine
    #[arg(short, long, default_value_t = 8)]
    threads: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EngineArg {
    /// Single-threaded
    Cpu,
    /// Multi-threaded
    Mt,
}

impl From<EngineArg> for EngineType {
    fn from(value: EngineArg) -> Self {
        match value {
            EngineArg::Cpu => EngineType::Cpu,
            EngineArg::Mt => EngineType::CpuMt,
        }
    }
}

fn block_type_from_flag(bytes: u32) -> Result<BlockType> {
    let block_type = match bytes {
        128 => BlockType::B128,
        256 => BlockType::B256,
        512 => BlockType::B512,
        1024 => BlockType::B1024,
        2048 => BlockType::B2048,
        4096 => BlockType::B4096,
        other => bail!("unknown block size {other}; expected 128|256|512|1024|2048|4096"),
    };
    Ok(block_type)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mpad=info,mumblepad=info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Encrypt(args) => encrypt(args),
        Command::Decrypt(args) => decrypt(args),
    }
}

fn encrypt(args: JobArgs) -> Result<()> {
    let block_type = match args.block {
        Some(bytes) => block_type_from_flag(bytes)?,
        None => BlockType::B128,
    };
    let input_name = args.input.to_string_lossy().into_owned();
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(encrypted_file_name(block_type, &input_name)));

    let mut engine = build_engine(&args.key, args.engine, block_type, args.threads)?;
    engine
        .encrypt_file(&args.input, &output)
        .with_context(|| format!("encrypting {} -> {}", args.input.display(), output.display()))?;
    Ok(())
}

fn decrypt(args: JobArgs) -> Result<()> {
    let input_name = args.input.to_string_lossy().into_owned();
    let (block_type, output) = match (&args.output, args.block) {
        // No output name: the input must carry a recognized extension,
        // which also fixes the output name and (absent -b) the block size.
        (None, block) => {
            let (from_ext, stripped) = parse_encrypted_file_name(&input_name).map_err(|_| {
                anyhow::anyhow!(
                    "cannot derive an output name: {} has no .mu1-.mu6 extension (pass -o)",
                    args.input.display()
                )
            })?;
            let block_type = match block {
                Some(bytes) => block_type_from_flag(bytes)?,
                None => from_ext,
            };
            (block_type, PathBuf::from(stripped))
        }
        (Some(output), Some(bytes)) => (block_type_from_flag(bytes)?, output.clone()),
        (Some(output), None) => {
            let block_type = block_type_from_file_name(&input_name).unwrap_or(BlockType::B128);
            (block_type, output.clone())
        }
    };

    let mut engine = build_engine(&args.key, args.engine, block_type, args.threads)?;
    engine
        .decrypt_file(&args.input, &output)
        .with_context(|| format!("decrypting {} -> {}", args.input.display(), output.display()))?;
    Ok(())
}

fn build_engine(
    key: &Path,
    engine: EngineArg,
    block_type: BlockType,
    threads: usize,
) -> Result<Engine> {
    let mut engine = Engine::new(engine.into(), block_type, true, threads);
    engine
        .load_key(key)
        .with_context(|| format!("loading key file {}", key.display()))?;
    Ok(engine)
}
