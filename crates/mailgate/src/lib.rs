//! # mailgate
//!
//! Auth broker daemon for mail proxies. Answers `auth_http` requests by
//! running them through a [`mailgate_core`] chain assembled from a TOML
//! configuration file.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]
#![allow(missing_docs)]

pub mod cli;
pub mod config;
pub mod server;
pub mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::cli::Options;
use crate::config::Config;

/// Loads configuration, assembles the chain and serves until Ctrl-C.
///
/// # Errors
///
/// Invalid configuration, a failed bind, or a server failure.
pub async fn run(options: Options) -> Result<()> {
    let mut config = match &options.config {
        Some(path) => Config::load(path)?,
        None => {
            warn!("no configuration file given, using defaults");
            Config::default()
        }
    };
    if let Some(listen) = options.listen {
        config.listen = listen;
    }

    let broker = Arc::new(config.broker()?);
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    server::serve(listener, broker, shutdown_signal()).await?;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
