//! CLI commands for devicemesh using clap.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::{get_settings_path, resolve_settings, Settings};
use crate::coordinator::Coordinator;
use crate::protocol::{ProtocolProcessor, ResponseMessage};

/// devicemesh - device-adaptive protocol coordinator.
#[derive(Parser)]
#[command(name = "devicemesh")]
#[command(version)]
#[command(about = "Device-adaptive protocol coordinator", long_about = None)]
pub struct Commands {
    /// Settings file (defaults to ~/.devicemesh/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve newline-delimited JSON envelopes from stdin to stdout
    Serve,

    /// Process a JSON array of envelopes and print the responses
    Process {
        /// File holding the envelopes
        file: PathBuf,
    },

    /// Print the effective settings
    Config,
}

impl Commands {
    /// Resolve settings from `--config` or the default location.
    pub fn settings(&self) -> Result<Settings> {
        resolve_settings(self.config.as_deref()).context("Failed to load settings")
    }

    /// Run the command.
    pub async fn run(&self, settings: Settings) -> Result<()> {
        match &self.command {
            Command::Serve => cmd_serve(settings).await,
            Command::Process { file } => cmd_process(settings, file).await,
            Command::Config => cmd_config(&settings, self.config.as_deref()),
        }
    }
}

// Command implementations

async fn cmd_serve(settings: Settings) -> Result<()> {
    tracing::info!("Serving as {}", settings.coordinator_id);

    let coordinator = Coordinator::new(settings);
    coordinator.start();
    let processor = ProtocolProcessor::new(coordinator.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            tracing::info!("Input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = processor.process_str(&line).await;
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }

    coordinator.shutdown().await;
    Ok(())
}

async fn cmd_process(settings: Settings, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let envelopes: Vec<Value> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array", file.display()))?;

    let responses = process_batch(settings, &envelopes).await;
    println!("{}", serde_json::to_string_pretty(&responses)?);
    Ok(())
}

/// Run envelopes in order against a fresh coordinator.
async fn process_batch(settings: Settings, envelopes: &[Value]) -> Vec<ResponseMessage> {
    let coordinator = Coordinator::new(settings);
    coordinator.start();
    let processor = ProtocolProcessor::new(coordinator.clone());

    let mut responses = Vec::with_capacity(envelopes.len());
    for envelope in envelopes {
        responses.push(processor.process(envelope).await);
        // Let background transfers and flushes settle so later envelopes see them.
        coordinator.drain().await;
    }

    coordinator.shutdown().await;
    responses
}

fn cmd_config(settings: &Settings, explicit: Option<&Path>) -> Result<()> {
    match explicit {
        Some(path) => println!("Settings: {}", path.display()),
        None => println!("Settings: {}", get_settings_path()?.display()),
    }
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}
