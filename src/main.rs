//! state-mirror - offline tools for the state mirror
//!
//! Replays captured controller traffic through a sync session, and checks
//! setting edits against the descriptors found in a snapshot.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;
use tracing::{info, warn};

use state_mirror::logging::init_logging;
use state_mirror::{validate, MemoryTransport, SettingDescriptor, SyncConfig, SyncSession};

/// State mirror tools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed a JSON-lines capture through a session and print the final tree
    Replay {
        /// Capture file, one `{"channel", "payload"}` or `{"event"}` per line
        file: String,
    },
    /// Check a raw setting value against the descriptor in a snapshot
    Validate {
        component: String,
        setting: String,
        value: String,
        /// Snapshot (JSON) holding the descriptors
        #[arg(long)]
        snapshot: String,
    },
}

/// One line of a capture file
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CaptureLine {
    Event { event: String },
    Message { channel: String, payload: Value },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SyncConfig::load(path).await?,
        None => SyncConfig::default(),
    };

    let level = args.log_level.as_deref().unwrap_or(&config.log.level);
    init_logging(level, config.log.json)?;

    match args.command {
        Command::Replay { file } => replay(config, &file).await,
        Command::Validate {
            component,
            setting,
            value,
            snapshot,
        } => check_setting(&component, &setting, value, &snapshot).await,
    }
}

async fn replay(config: SyncConfig, file: &str) -> Result<()> {
    let contents = fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read capture file: {}", file))?;

    let (transport, events) = MemoryTransport::new();
    let session = SyncSession::spawn(config, transport.clone(), events);

    let mut lines = 0usize;
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: CaptureLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(line = number + 1, error = %e, "Skipping unreadable capture line");
                continue;
            }
        };
        match parsed {
            CaptureLine::Event { event } => match event.as_str() {
                "connect" => {
                    transport.connect();
                }
                "disconnect" => {
                    transport.disconnect();
                }
                other => warn!(line = number + 1, event = other, "Unknown lifecycle event"),
            },
            CaptureLine::Message { channel, payload } => {
                transport.deliver(&channel, &payload);
            }
        }
        lines += 1;
    }
    info!(lines, "Capture replayed");

    let stats = session.stats().await.context("Sync session stopped unexpectedly")?;
    let tree = session.tree().await.unwrap_or(Value::Null);
    session.shutdown();

    println!("{}", serde_json::to_string_pretty(&tree)?);
    eprintln!(
        "status: {:?}, snapshots: {}, applied: {}, dropped: {}",
        stats.status, stats.mirror.snapshots, stats.mirror.applied, stats.mirror.dropped
    );
    Ok(())
}

async fn check_setting(component: &str, setting: &str, raw: String, snapshot: &str) -> Result<()> {
    let contents = fs::read_to_string(snapshot)
        .await
        .with_context(|| format!("Failed to read snapshot: {}", snapshot))?;
    let tree: Value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse snapshot: {}", snapshot))?;

    let descriptor = SettingDescriptor::lookup(&tree, component, setting)?;
    match validate(&Value::String(raw), &descriptor) {
        Ok(value) => {
            println!("{}", value.to_json());
            Ok(())
        }
        Err(e) => anyhow::bail!("{}.{} rejected: {}", component, setting, e),
    }
}
