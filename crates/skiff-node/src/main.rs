//! skiff - encrypted replicating file store over a small TCP mesh

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use skiff_core::crypto::{self, EncryptionKey};
use skiff_node::config::{expand_path, Config};
use skiff_node::{FileServer, FileServerOpts};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "skiff")]
#[command(about = "Encrypted replicating file store over a small TCP mesh", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<String>,

    /// TCP listen address (host:port, or :port for all interfaces)
    #[arg(short, long)]
    listen: Option<String>,

    /// Bootstrap peer address (repeatable)
    #[arg(short, long)]
    bootstrap: Vec<String>,

    /// Node identifier (generated when absent)
    #[arg(long)]
    id: Option<String>,

    /// 64-char hex encoding of the 32-byte mesh key
    #[arg(long)]
    key_hex: Option<String>,

    /// File holding the mesh key (raw 32 bytes, or 64 hex chars)
    #[arg(long)]
    key_file: Option<String>,

    /// Storage root directory
    #[arg(short, long)]
    root: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(&expand_path(path))?,
        None => Config::default(),
    };

    let listen_addr = cli
        .listen
        .or(config.listen_addr)
        .ok_or_else(|| anyhow!("listen address required (--listen or config file)"))?;

    let bootstrap_nodes = if cli.bootstrap.is_empty() {
        config.bootstrap_nodes
    } else {
        cli.bootstrap
    };

    let enc_key = resolve_key(
        cli.key_hex.or(config.key_hex).as_deref(),
        cli.key_file.or(config.key_file).as_deref(),
    )?;

    let storage_root = cli
        .root
        .or(config.storage_root)
        .map(|r| expand_path(&r).to_string_lossy().into_owned())
        .unwrap_or_default();

    let server = FileServer::new(FileServerOpts {
        id: cli.id.or(config.node_id),
        enc_key,
        storage_root,
        listen_addr,
        bootstrap_nodes,
    })?;

    tracing::info!("node id: {}", server.id());

    let runner = Arc::clone(&server);
    let handle = tokio::spawn(async move { runner.start().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.stop();
    handle.await??;

    Ok(())
}

/// Resolve the mesh key: explicit hex wins, then a key file, otherwise a
/// fresh key is generated and printed so the rest of the mesh can share
/// it.
fn resolve_key(key_hex: Option<&str>, key_file: Option<&str>) -> Result<EncryptionKey> {
    if let Some(hex_str) = key_hex {
        return parse_key_hex(hex_str.trim());
    }

    if let Some(path) = key_file {
        let raw = std::fs::read(expand_path(path))?;
        if raw.len() == 32 {
            let mut key = [0u8; 32];
            key.copy_from_slice(&raw);
            return Ok(key);
        }
        // otherwise expect hex, possibly with trailing whitespace
        let text = std::str::from_utf8(&raw)
            .map_err(|_| anyhow!("key file must hold 32 raw bytes or 64 hex chars"))?;
        return parse_key_hex(text.trim());
    }

    let key = crypto::new_encryption_key()?;
    println!("generated mesh key: {}", hex::encode(key));
    println!("pass it to the other nodes with --key-hex to form a mesh");
    Ok(key)
}

fn parse_key_hex(hex_str: &str) -> Result<EncryptionKey> {
    let bytes = hex::decode(hex_str)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("mesh key must be exactly 32 bytes, got {}", bytes.len()))
}
