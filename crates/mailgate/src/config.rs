//! Daemon configuration file.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::{Context, Result};
use mailgate_core::{Assembler, Broker, StageConfig};
use serde::Deserialize;
use tracing::warn;

const DEFAULT_PORT: u16 = 8080;

/// Top-level configuration.
///
/// Without a `chain` the daemon deploys [`Assembler::default_chain`], which
/// rejects every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the auth endpoint listens on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Chain topology.
    #[serde(default)]
    pub chain: Option<StageConfig>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            chain: None,
        }
    }
}

impl Config {
    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or is not valid configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid configuration in {}", path.display()))
    }

    /// Parses configuration text.
    ///
    /// # Errors
    ///
    /// If `text` is not valid TOML or does not match the schema.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Assembles the broker for this configuration.
    ///
    /// # Errors
    ///
    /// If the chain topology is invalid.
    pub fn broker(&self) -> Result<Broker> {
        let assembler = Assembler::new();
        let chain = if let Some(chain) = &self.chain {
            assembler.build(chain).context("invalid chain topology")?
        } else {
            warn!("no chain configured, every attempt will be rejected");
            assembler.default_chain()?
        };
        Ok(Broker::from_boxed(chain))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use mailgate_core::{Method, Protocol, Request};

    use super::*;

    #[test]
    fn test_empty_file() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.listen.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_full_file() {
        let config = Config::parse(
            r#"
            listen = "0.0.0.0:9000"

            [chain]
            kind = "throttle"
            base_delay = 2
            max_delay = 16

            [chain.next]
            kind = "method_gate"
            allowed = ["plain"]

            [chain.next.next]
            kind = "endpoint_select"
            endpoints = [{ protocol = "imap", host = "imap.internal", port = 143, security = "none" }]

            [chain.next.next.next]
            kind = "any_of"
            stages = [
              { kind = "imap_login", host = "mx1.internal", port = 993, security = "implicit" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.chain.as_ref().unwrap().kind(), "throttle");
        assert!(config.broker().is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Config::parse("port = 25").is_err());
    }

    #[test]
    fn test_invalid_topology_fails_before_serving() {
        let config = Config::parse(
            r#"
            [chain]
            kind = "any_of"
            stages = []
            "#,
        )
        .unwrap();

        let err = config.broker().err().unwrap();
        assert!(format!("{err:#}").contains("any_of at chain has no stages"));
    }

    #[tokio::test]
    async fn test_missing_chain_uses_default() {
        let broker = Config::default().broker().unwrap();
        let request = Request::new(Method::Plain, "bob", "pw", Protocol::Imap, "1.2.3.4");

        let response = broker.authenticate(&request).await;

        assert_eq!(response.status, "Invalid username or password");
        assert_eq!(response.wait, 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/mailgate.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
