//! CLI for the senlog data-logging pipeline.
//!
//! Provides commands for inspecting pool directories, decoding packs and
//! pushing a pack to a CoAP backend by hand.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use senlog::net::{CoapClient, RemoteResource, Transport};
use senlog::pool;
use senlog::senml::decode_pack;

/// senlog — constrained-device data-logging pipeline CLI.
#[derive(Parser)]
#[command(name = "senlog", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List the pool files of a directory, oldest first.
    Ls {
        /// Path to the pool directory.
        pool_path: PathBuf,
    },

    /// Decode a pack file and print its records as JSON.
    Decode {
        /// Path to the pack file.
        file: PathBuf,
    },

    /// Delete every pool file of a directory.
    Drain {
        /// Path to the pool directory.
        pool_path: PathBuf,
    },

    /// PUT one pack file to a CoAP backend, block-wise.
    Send {
        /// Path to the pack file.
        file: PathBuf,

        /// Backend address (IP or host name).
        #[arg(long)]
        addr: String,

        /// Backend UDP port.
        #[arg(long, default_value = "5683")]
        port: u16,

        /// CoAP resource path.
        #[arg(long, default_value = "/storage")]
        path: String,

        /// Block size exponent (4..=10; 10 = 1024-byte blocks).
        #[arg(long, default_value = "10")]
        block_size_exp: u8,

        /// Per-block response timeout in milliseconds.
        #[arg(long, default_value = "2000")]
        timeout_ms: u64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Ls { pool_path } => cmd_ls(&pool_path),
        Commands::Decode { file } => cmd_decode(&file),
        Commands::Drain { pool_path } => cmd_drain(&pool_path),
        Commands::Send {
            file,
            addr,
            port,
            path,
            block_size_exp,
            timeout_ms,
        } => cmd_send(&file, &addr, port, &path, block_size_exp, timeout_ms),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `senlog ls <pool_path>`.
fn cmd_ls(pool_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let ids = pool::list(pool_path)?;
    if ids.is_empty() {
        println!("pool {} is empty", pool_path.display());
        return Ok(());
    }

    println!("pool {} ({} files)", pool_path.display(), ids.len());
    for id in ids {
        let path = pool_path.join(pool::file_name(id));
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        println!("  {}  {size} bytes", pool::file_name(id));
    }

    Ok(())
}

/// Implements `senlog decode <file>`.
fn cmd_decode(file: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(file)?;
    let records = decode_pack(&bytes)?;

    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

/// Implements `senlog drain <pool_path>`.
fn cmd_drain(pool_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let before = pool::size(pool_path)?;
    pool::drain(pool_path)?;
    println!("removed {before} files from {}", pool_path.display());
    Ok(())
}

/// Implements `senlog send <file> --addr ...`.
fn cmd_send(
    file: &PathBuf,
    addr: &str,
    port: u16,
    path: &str,
    block_size_exp: u8,
    timeout_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = CoapClient::new(block_size_exp)?
        .with_timeout(Duration::from_millis(timeout_ms));
    let resource = RemoteResource::new(addr, port, path);

    let mut source = std::fs::File::open(file)?;
    let sent = client.send(&resource, &mut source)?;
    println!("sent {sent} bytes to coap://{addr}:{port}{path}");

    Ok(())
}
