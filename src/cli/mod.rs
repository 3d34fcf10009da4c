//! # CLI Module
//!
//! Command-line interface of the `arbor` binary.
//!
//! ## Commands
//!
//! ### `serve`
//!
//! Serve the demo application tree until SIGINT or SIGTERM:
//!
//! ```bash
//! arbor serve --config arbor.yaml --addr 0.0.0.0:8080 --threads 16
//! ```
//!
//! Options:
//! - `--config <FILE>` - YAML or TOML configuration file
//! - `--addr <HOST:PORT>` - overrides `server.socket_host` / `server.socket_port`
//! - `--threads <N>` - overrides `server.thread_pool`
//! - `--queue-bound <N>` - overrides `server.queue_bound`
//! - `--backpressure <block|shed>` - overrides `server.backpressure`
//!
//! ### `show-config`
//!
//! Print the effective server settings after file, environment and flag
//! overrides:
//!
//! ```bash
//! arbor show-config --config arbor.toml
//! ```
//!
//! ## Usage from Code
//!
//! ```rust,ignore
//! use arbor::cli::{run_cli, Cli};
//! use clap::Parser;
//!
//! run_cli(Cli::parse())?;
//! ```

mod commands;


pub use commands::{load_settings, run_cli, Cli, Commands, EffectiveSettings, Overrides};
