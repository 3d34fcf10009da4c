use crate::config::SectionConfig;
use crate::demo;
use crate::runtime_config::ServerConfig;
use crate::server::Server;
use crate::worker_pool::BackpressureMode;
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Command-line interface for arbor
#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(about = "Object-tree HTTP runtime", long_about = None)]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the demo application until interrupted
    Serve {
        /// YAML or TOML configuration file
        #[arg(short, long, env = "ARBOR_CONFIG")]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print the effective server settings and exit
    ShowConfig {
        /// YAML or TOML configuration file
        #[arg(short, long, env = "ARBOR_CONFIG")]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Command-line overrides, applied after the file and the environment.
#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Address to bind, as `host:port`
    #[arg(long)]
    pub addr: Option<String>,

    /// Number of worker threads
    #[arg(long)]
    pub threads: Option<usize>,

    /// Maximum queued connections (0 = unbounded)
    #[arg(long)]
    pub queue_bound: Option<usize>,

    /// What to do when the queue is full: block or shed
    #[arg(long)]
    pub backpressure: Option<String>,
}

/// Load the configuration file (if any) and derive the server settings.
///
/// # Errors
///
/// Unreadable or malformed configuration files, invalid `server.*` values,
/// and malformed overrides.
pub fn load_settings(
    path: Option<&Path>,
    overrides: &Overrides,
) -> anyhow::Result<(SectionConfig, ServerConfig)> {
    let config = match path {
        Some(path) => SectionConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => SectionConfig::new(),
    };
    let mut server = ServerConfig::from_config(&config)?;

    if let Some(addr) = &overrides.addr {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("--addr must be host:port, got {addr:?}"))?;
        server.socket_host = host.to_string();
        server.socket_port = port
            .parse()
            .with_context(|| format!("Invalid port in --addr {addr:?}"))?;
    }
    if let Some(threads) = overrides.threads {
        server.thread_pool = threads;
    }
    if let Some(bound) = overrides.queue_bound {
        server.queue_bound = bound;
    }
    if let Some(mode) = &overrides.backpressure {
        server.backpressure = BackpressureMode::parse(mode)
            .ok_or_else(|| anyhow!("--backpressure must be 'block' or 'shed', got {mode:?}"))?;
    }
    Ok((config, server))
}

/// What `show-config` prints.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub bind: String,
    pub thread_pool: usize,
    pub socket_queue_size: i32,
    pub queue_bound: usize,
    pub backpressure: BackpressureMode,
    pub socket_timeout_ms: u64,
    pub accept_poll_ms: u64,
    pub protocol_version: String,
}

impl From<&ServerConfig> for EffectiveSettings {
    fn from(c: &ServerConfig) -> Self {
        Self {
            bind: c.bind_addr(),
            thread_pool: c.thread_pool,
            socket_queue_size: c.socket_queue_size,
            queue_bound: c.queue_bound,
            backpressure: c.backpressure,
            socket_timeout_ms: millis(c.socket_timeout),
            accept_poll_ms: millis(c.accept_poll),
            protocol_version: c.protocol_version.to_string(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Execute the parsed command.
///
/// # Errors
///
/// Configuration errors, bind failures, and worker panics reported at
/// shutdown.
pub fn run_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { config, overrides } => {
            let (config, settings) = load_settings(config.as_deref(), &overrides)?;
            let (engine, _metrics) = demo::engine(config);
            let server = Server::new(engine, settings);
            register_signals(&server.interrupt_flag())?;
            let addr = server.start()?;
            info!(addr = %addr, "Listening; press Ctrl-C to stop");
            server.serve_until_interrupted()?;
            Ok(())
        }
        Commands::ShowConfig { config, overrides } => {
            let (_, settings) = load_settings(config.as_deref(), &overrides)?;
            let effective = EffectiveSettings::from(&settings);
            println!("{}", serde_json::to_string_pretty(&effective)?);
            Ok(())
        }
    }
}

#[cfg(unix)]
fn register_signals(flag: &Arc<AtomicBool>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(flag))
            .with_context(|| format!("Failed to register handler for signal {signal}"))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn register_signals(_flag: &Arc<AtomicBool>) -> anyhow::Result<()> {
    Ok(())
}
