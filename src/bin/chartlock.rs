//! Chartlock CLI: key administration and file encryption
//!
//! Usage:
//!   chartlock init
//!   chartlock status
//!   chartlock rotate
//!   chartlock encrypt --in <FILE> --out <FILE>
//!   chartlock decrypt --in <FILE> --out <FILE>
//!   chartlock migrate --in <FILE> --out <FILE>
//!   chartlock inspect <FILE>

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use chartlock::config::{LogFormat, VaultConfig};
use chartlock::wire::{CHUNK_SIZE, SEALED_CHUNK_SIZE, TAG_BYTES};
use chartlock::{CryptError, EncryptionEngine, KeyManager};

#[derive(Parser, Debug)]
#[command(name = "chartlock", version, about = "Key-versioned encryption at rest")]
struct Cli {
    /// Path to chartlock.toml
    #[arg(long, short = 'c', global = true, env = "CHARTLOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Override the key directory
    #[arg(long, global = true)]
    key_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the key directory and the first key if needed
    Init,
    /// Show the current key version and every stored version (requires init)
    Status,
    /// Generate a new key and make it current
    Rotate,
    /// Encrypt a file under the current key
    Encrypt(FilePair),
    /// Decrypt a file with the key version it names
    Decrypt(FilePair),
    /// Re-encrypt a file under the current key
    Migrate(FilePair),
    /// Show container metadata (no decryption)
    Inspect {
        /// Encrypted file
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct FilePair {
    /// Source file
    #[arg(long = "in")]
    input: PathBuf,
    /// Destination file (must not be the source)
    #[arg(long = "out")]
    output: PathBuf,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn init_logging(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chartlock=info,chartlock_keystore=info".into());
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn open_keys(config: &VaultConfig) -> Result<Arc<KeyManager>, Box<dyn std::error::Error>> {
    let keys = KeyManager::open_dir(&config.key_directory, config.key_manager_options())
        .map_err(|e| {
            error!(path = %config.key_directory.display(), error = %e, "key bootstrap failed");
            e
        })?;
    Ok(Arc::new(keys))
}

/// Open a key directory that `init` has already set up. Never writes a key.
fn open_existing_keys(
    config: &VaultConfig,
) -> Result<Arc<KeyManager>, Box<dyn std::error::Error>> {
    let keys = KeyManager::open_existing_dir(&config.key_directory, config.key_manager_options())
        .map_err(|e| {
            error!(path = %config.key_directory.display(), error = %e, "no usable key directory");
            format!(
                "{} (run `chartlock init` to create keys in {})",
                e,
                config.key_directory.display()
            )
        })?;
    Ok(Arc::new(keys))
}

fn cmd_init(config: &VaultConfig) -> CliResult {
    let keys = open_keys(config)?;
    println!("key directory:   {}", config.key_directory.display());
    println!("current version: {}", keys.current_version());
    Ok(())
}

fn cmd_status(config: &VaultConfig) -> CliResult {
    let keys = open_existing_keys(config)?;
    let versions = keys.versions()?;
    println!("key directory:   {}", config.key_directory.display());
    println!("current version: {}", keys.current_version());
    if let Some(pinned) = config.current_key_version {
        println!("pinned version:  {}", pinned);
    }
    let listed: Vec<String> = versions.iter().map(i32::to_string).collect();
    println!("stored versions: {}", listed.join(", "));
    Ok(())
}

fn cmd_rotate(config: &VaultConfig) -> CliResult {
    let keys = open_existing_keys(config)?;
    let previous = keys.current_version();
    let version = keys.rotate_key()?;
    println!("rotated key: v{} -> v{}", previous, version);
    if config.current_key_version.is_some() {
        eprintln!(
            "note: current_key_version is pinned in configuration; update it to {} to keep using the new key",
            version
        );
    }
    Ok(())
}

async fn cmd_encrypt(config: &VaultConfig, files: &FilePair) -> CliResult {
    let engine = EncryptionEngine::new(open_existing_keys(config)?);
    let header = engine.encrypt_file(&files.input, &files.output).await?;
    eprintln!(
        "encrypted {} -> {} (key v{})",
        files.input.display(),
        files.output.display(),
        header.key_version
    );
    Ok(())
}

async fn cmd_decrypt(config: &VaultConfig, files: &FilePair) -> CliResult {
    let engine = EncryptionEngine::new(open_existing_keys(config)?);
    let header = engine.decrypt_file(&files.input, &files.output).await?;
    eprintln!(
        "decrypted {} -> {} (key v{})",
        files.input.display(),
        files.output.display(),
        header.key_version
    );
    Ok(())
}

async fn cmd_migrate(config: &VaultConfig, files: &FilePair) -> CliResult {
    let engine = EncryptionEngine::new(open_existing_keys(config)?);
    let old = engine.read_file_header(&files.input).await?;
    let new = engine.re_encrypt_file(&files.input, &files.output).await?;
    eprintln!(
        "migrated {} -> {} (key v{} -> v{})",
        files.input.display(),
        files.output.display(),
        old.key_version,
        new.key_version
    );
    Ok(())
}

async fn cmd_inspect(file: &Path) -> CliResult {
    let header = chartlock::read_file_header(file).await?;
    let total = tokio::fs::metadata(file).await?.len();
    let body = total.saturating_sub(header.encoded_len() as u64);
    let sealed = SEALED_CHUNK_SIZE as u64;
    let chunks = body.div_ceil(sealed);
    let plaintext = body.saturating_sub(chunks * TAG_BYTES as u64);

    println!("Chartlock container");
    println!("  key version:   {}", header.key_version);
    println!("  salt:          {} ({} bytes)", hex::encode(&header.salt), header.salt.len());
    println!("  iv:            {}", hex::encode(header.iv));
    println!("  file size:     {} bytes", total);
    println!("  chunks:        {} (chunk size {})", chunks, CHUNK_SIZE);
    println!("  plaintext:     {} bytes", plaintext);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match VaultConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(dir) = cli.key_dir {
        config.key_directory = dir;
    }
    init_logging(config.log_format);
    info!(command = ?cli.command, "chartlock starting");

    let result = match &cli.command {
        Command::Init => cmd_init(&config),
        Command::Status => cmd_status(&config),
        Command::Rotate => cmd_rotate(&config),
        Command::Encrypt(files) => cmd_encrypt(&config, files).await,
        Command::Decrypt(files) => cmd_decrypt(&config, files).await,
        Command::Migrate(files) => cmd_migrate(&config, files).await,
        Command::Inspect { file } => cmd_inspect(file).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<CryptError>() {
                Some(crypt) => eprintln!("error: {}", crypt.user_message()),
                None => eprintln!("error: {}", e),
            }
            ExitCode::FAILURE
        }
    }
}
