//! Declarative chain assembly.
//!
//! A deployment describes its chain as a tree of [`StageConfig`] values,
//! usually read from TOML:
//!
//! ```toml
//! kind = "throttle"
//! base_delay = 2
//! max_delay = 16
//!
//! [next]
//! kind = "method_gate"
//! allowed = ["plain"]
//!
//! [next.next]
//! kind = "any_of"
//! stages = [{ kind = "imap_login", host = "mx1.internal", port = 993 }]
//! ```
//!
//! [`Assembler::build`] validates the whole tree and returns the chain, or
//! the first [`TopologyError`] found. Nothing is served from a tree that
//! failed validation.

use std::sync::Arc;
use std::time::Duration;

use mailgate_imap::Security;
use serde::Deserialize;
use tracing::debug;

use crate::directory::HttpDirectory;
use crate::endpoint::{Endpoint, Endpoints};
use crate::error::TopologyError;
use crate::handler::BoxedHandler;
use crate::request::{Method, Protocol};
use crate::stage::{
    AnyOf, DelayCacheFactory, EndpointSelect, ImapLogin, MailboxProbe, MethodGate, Throttle,
    ThrottlePolicy,
};

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Transport security as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// TLS from the first byte.
    #[default]
    Implicit,
    /// Plain text.
    None,
    /// Plain connect, then STARTTLS.
    StartTls,
}

impl From<SecurityMode> for Security {
    fn from(mode: SecurityMode) -> Self {
        match mode {
            SecurityMode::Implicit => Self::Implicit,
            SecurityMode::None => Self::None,
            SecurityMode::StartTls => Self::StartTls,
        }
    }
}

/// One row of an endpoint map.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointConfig {
    /// Protocol routed to this backend.
    pub protocol: Protocol,
    /// Backend host.
    pub host: String,
    /// Backend port.
    pub port: u16,
    /// Transport security.
    #[serde(default)]
    pub security: SecurityMode,
}

/// A stage and, recursively, everything below it.
///
/// `next` is accepted on every kind so that a successor on a terminal stage
/// is reported as an error instead of being silently ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageConfig {
    /// Exponential backoff per client address.
    Throttle {
        /// First delay, in seconds.
        base_delay: u32,
        /// Delay ceiling, in seconds.
        max_delay: u32,
        /// Decorated stage.
        next: Option<Box<StageConfig>>,
    },
    /// Allow-list of authentication methods.
    MethodGate {
        /// Methods let through.
        allowed: Vec<Method>,
        /// Decorated stage.
        next: Option<Box<StageConfig>>,
    },
    /// Routes successes to a backend per protocol.
    EndpointSelect {
        /// Protocol to backend map.
        endpoints: Vec<EndpointConfig>,
        /// Decorated stage.
        next: Option<Box<StageConfig>>,
    },
    /// Mailbox existence check against an HTTP directory.
    MailboxProbe {
        /// Directory URL; `mailbox` and `domain` are appended as query.
        base_url: String,
        /// Per-request timeout, in seconds.
        #[serde(default = "default_directory_timeout")]
        timeout_secs: u64,
        /// Decorated stage.
        next: Option<Box<StageConfig>>,
    },
    /// First success among alternatives.
    AnyOf {
        /// Alternatives, tried in order.
        stages: Vec<StageConfig>,
        /// Always rejected.
        next: Option<Box<StageConfig>>,
    },
    /// IMAP LOGIN against one backend.
    ImapLogin {
        /// Backend host.
        host: String,
        /// Backend port; defaults by security mode.
        port: Option<u16>,
        /// Transport security.
        #[serde(default)]
        security: SecurityMode,
        /// Connect plus handshake bound, in seconds.
        connect_timeout_secs: Option<u64>,
        /// Per-command bound, in seconds.
        io_timeout_secs: Option<u64>,
        /// Always rejected.
        next: Option<Box<StageConfig>>,
    },
}

const fn default_directory_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

impl StageConfig {
    /// Configuration name of this stage kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Throttle { .. } => "throttle",
            Self::MethodGate { .. } => "method_gate",
            Self::EndpointSelect { .. } => "endpoint_select",
            Self::MailboxProbe { .. } => "mailbox_probe",
            Self::AnyOf { .. } => "any_of",
            Self::ImapLogin { .. } => "imap_login",
        }
    }
}

/// Builds chains from configuration.
///
/// Every throttle in every chain built by one assembler gets its own cache
/// from the assembler's [`DelayCacheFactory`].
#[derive(Debug, Default)]
pub struct Assembler {
    caches: DelayCacheFactory,
}

impl Assembler {
    /// Creates an assembler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            caches: DelayCacheFactory::new(),
        }
    }

    /// Validates `config` and builds the chain it describes.
    ///
    /// # Errors
    ///
    /// The first [`TopologyError`] found, depth first.
    pub fn build(&self, config: &StageConfig) -> Result<BoxedHandler, TopologyError> {
        self.build_at(config, "chain")
    }

    /// The chain deployed when no topology is configured:
    /// throttle(2, 16), then a PLAIN-only gate, then an empty fan-out that
    /// rejects everything.
    ///
    /// # Errors
    ///
    /// Only if the built-in parameters were invalid.
    pub fn default_chain(&self) -> Result<BoxedHandler, TopologyError> {
        let chain = Throttle::new(
            ThrottlePolicy::new(2, 16)?,
            &self.caches,
            MethodGate::new([Method::Plain], AnyOf::new(Vec::new()))?,
        );
        Ok(Box::new(chain))
    }

    fn build_at(&self, config: &StageConfig, path: &str) -> Result<BoxedHandler, TopologyError> {
        let handler: BoxedHandler = match config {
            StageConfig::Throttle {
                base_delay,
                max_delay,
                next,
            } => {
                let policy = ThrottlePolicy::new(*base_delay, *max_delay)?;
                let next = self.build_next(config, next.as_deref(), path)?;
                let cache = self.caches.create();
                debug!(path, cache = %cache.name(), "throttle assembled");
                Box::new(Throttle::with_cache(policy, cache, next))
            }
            StageConfig::MethodGate { allowed, next } => {
                if allowed.is_empty() {
                    return Err(TopologyError::EmptyMethods(path.to_string()));
                }
                let next = self.build_next(config, next.as_deref(), path)?;
                Box::new(MethodGate::new(allowed.iter().copied(), next)?)
            }
            StageConfig::EndpointSelect { endpoints, next } => {
                let endpoints = Endpoints::try_from_iter(endpoints.iter().map(|e| {
                    (
                        e.protocol,
                        Endpoint::new(e.host.clone(), e.port, e.security.into()),
                    )
                }))?;
                let next = self.build_next(config, next.as_deref(), path)?;
                Box::new(EndpointSelect::new(endpoints, next))
            }
            StageConfig::MailboxProbe {
                base_url,
                timeout_secs,
                next,
            } => {
                let directory =
                    HttpDirectory::new(base_url, Duration::from_secs(*timeout_secs))?;
                let next = self.build_next(config, next.as_deref(), path)?;
                Box::new(MailboxProbe::new(Arc::new(directory), next))
            }
            StageConfig::AnyOf { stages, next } => {
                reject_next(config, next.as_deref(), path)?;
                if stages.is_empty() {
                    return Err(TopologyError::EmptyAnyOf(path.to_string()));
                }
                let stages = stages
                    .iter()
                    .enumerate()
                    .map(|(i, stage)| self.build_at(stage, &format!("{path}.stages[{i}]")))
                    .collect::<Result<Vec<_>, _>>()?;
                Box::new(AnyOf::new(stages))
            }
            StageConfig::ImapLogin {
                host,
                port,
                security,
                connect_timeout_secs,
                io_timeout_secs,
                next,
            } => {
                reject_next(config, next.as_deref(), path)?;
                let security = Security::from(*security);
                let endpoint = Endpoint::new(
                    host.clone(),
                    port.unwrap_or_else(|| security.default_port()),
                    security,
                );
                let mut login = ImapLogin::new(endpoint);
                if let Some(secs) = connect_timeout_secs {
                    login = login.connect_timeout(Duration::from_secs(*secs));
                }
                if let Some(secs) = io_timeout_secs {
                    login = login.io_timeout(Duration::from_secs(*secs));
                }
                Box::new(login)
            }
        };
        Ok(handler)
    }

    fn build_next(
        &self,
        config: &StageConfig,
        next: Option<&StageConfig>,
        path: &str,
    ) -> Result<BoxedHandler, TopologyError> {
        let next = next.ok_or_else(|| TopologyError::MissingNext {
            kind: config.kind(),
            path: path.to_string(),
        })?;
        self.build_at(next, &format!("{path}.next"))
    }
}

fn reject_next(
    config: &StageConfig,
    next: Option<&StageConfig>,
    path: &str,
) -> Result<(), TopologyError> {
    match next {
        Some(_) => Err(TopologyError::TerminalStage {
            kind: config.kind(),
            path: path.to_string(),
        }),
        None => Ok(()),
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
    use super::*;
    use crate::Request;
    use crate::handler::AuthHandler;

    fn parse(toml_text: &str) -> StageConfig {
        toml::from_str(toml_text).unwrap()
    }

    fn build_err(toml_text: &str) -> TopologyError {
        match Assembler::new().build(&parse(toml_text)) {
            Ok(_) => panic!("expected assembly to fail"),
            Err(e) => e,
        }
    }

    const FULL: &str = r#"
        kind = "throttle"
        base_delay = 2
        max_delay = 16

        [next]
        kind = "method_gate"
        allowed = ["plain"]

        [next.next]
        kind = "endpoint_select"
        endpoints = [
          { protocol = "imap", host = "imap.internal", port = 143, security = "none" },
          { protocol = "smtp", host = "smtp.internal", port = 587, security = "starttls" },
        ]

        [next.next.next]
        kind = "mailbox_probe"
        base_url = "http://directory.internal/check"

        [next.next.next.next]
        kind = "any_of"
        stages = [
          { kind = "imap_login", host = "mx1.internal", port = 993, security = "implicit" },
          { kind = "imap_login", host = "mx2.internal", security = "starttls", io_timeout_secs = 5 },
        ]
    "#;

    #[test]
    fn test_parse_full_chain() {
        let config = parse(FULL);

        let StageConfig::Throttle {
            base_delay,
            max_delay,
            next,
        } = &config
        else {
            panic!("expected throttle, got {}", config.kind());
        };
        assert_eq!((*base_delay, *max_delay), (2, 16));
        assert_eq!(next.as_deref().unwrap().kind(), "method_gate");
    }

    #[test]
    fn test_parse_defaults() {
        let config = parse(
            r#"
            kind = "mailbox_probe"
            base_url = "http://d/"
            [next]
            kind = "imap_login"
            host = "mx"
            "#,
        );

        let StageConfig::MailboxProbe {
            timeout_secs, next, ..
        } = config
        else {
            panic!("expected mailbox_probe");
        };
        assert_eq!(timeout_secs, DEFAULT_PROBE_TIMEOUT_SECS);
        assert_eq!(
            *next.unwrap(),
            StageConfig::ImapLogin {
                host: "mx".to_string(),
                port: None,
                security: SecurityMode::Implicit,
                connect_timeout_secs: None,
                io_timeout_secs: None,
                next: None,
            }
        );
    }

    #[test]
    fn test_build_full_chain() {
        assert!(Assembler::new().build(&parse(FULL)).is_ok());
    }

    #[test]
    fn test_unknown_kind_fails_to_parse() {
        let result: Result<StageConfig, _> = toml::from_str(r#"kind = "ldap""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_terminal_with_next_rejected() {
        let err = build_err(
            r#"
            kind = "imap_login"
            host = "mx1"
            [next]
            kind = "imap_login"
            host = "mx2"
            "#,
        );
        assert!(matches!(
            err,
            TopologyError::TerminalStage { kind: "imap_login", ref path } if path == "chain"
        ));
    }

    #[test]
    fn test_any_of_with_next_rejected() {
        let err = build_err(
            r#"
            kind = "any_of"
            stages = [{ kind = "imap_login", host = "mx1" }]
            [next]
            kind = "imap_login"
            host = "mx2"
            "#,
        );
        assert!(matches!(err, TopologyError::TerminalStage { kind: "any_of", .. }));
    }

    #[test]
    fn test_nested_terminal_path() {
        let err = build_err(
            r#"
            kind = "method_gate"
            allowed = ["plain"]
            [next]
            kind = "any_of"
            stages = [
              { kind = "imap_login", host = "mx1" },
              { kind = "imap_login", host = "mx2", next = { kind = "imap_login", host = "mx3" } },
            ]
            "#,
        );
        assert!(matches!(
            err,
            TopologyError::TerminalStage { ref path, .. } if path == "chain.next.stages[1]"
        ));
    }

    #[test]
    fn test_decorator_without_next_rejected() {
        let err = build_err(
            r#"
            kind = "throttle"
            base_delay = 1
            max_delay = 8
            "#,
        );
        assert!(matches!(
            err,
            TopologyError::MissingNext { kind: "throttle", ref path } if path == "chain"
        ));
    }

    #[test]
    fn test_empty_any_of_rejected() {
        let err = build_err(
            r#"
            kind = "any_of"
            stages = []
            "#,
        );
        assert!(matches!(err, TopologyError::EmptyAnyOf(ref path) if path == "chain"));
    }

    #[test]
    fn test_empty_methods_rejected() {
        let err = build_err(
            r#"
            kind = "method_gate"
            allowed = []
            [next]
            kind = "imap_login"
            host = "mx1"
            "#,
        );
        assert!(matches!(err, TopologyError::EmptyMethods(_)));
    }

    #[test]
    fn test_duplicate_endpoint_rejected() {
        let err = build_err(
            r#"
            kind = "endpoint_select"
            endpoints = [
              { protocol = "imap", host = "a", port = 143 },
              { protocol = "imap", host = "b", port = 143 },
            ]
            [next]
            kind = "imap_login"
            host = "mx1"
            "#,
        );
        assert!(matches!(err, TopologyError::DuplicateEndpoint(Protocol::Imap)));
    }

    #[test]
    fn test_invalid_delays_rejected() {
        let err = build_err(
            r#"
            kind = "throttle"
            base_delay = 32
            max_delay = 16
            [next]
            kind = "imap_login"
            host = "mx1"
            "#,
        );
        assert!(matches!(err, TopologyError::InvalidDelay { base: 32, max: 16 }));
    }

    #[test]
    fn test_invalid_directory_url_rejected() {
        let err = build_err(
            r#"
            kind = "mailbox_probe"
            base_url = "no scheme here"
            [next]
            kind = "imap_login"
            host = "mx1"
            "#,
        );
        assert!(matches!(err, TopologyError::Directory(_)));
    }

    #[tokio::test]
    async fn test_default_chain_rejects_and_throttles() {
        let chain = Assembler::new().default_chain().unwrap();
        let request = Request::new(Method::Plain, "bob", "pw", Protocol::Imap, "1.2.3.4");

        let first = chain.authenticate(&request).await;
        let second = chain.authenticate(&request).await;

        assert_eq!(first.status, "Invalid username or password");
        assert_eq!(first.wait, 2);
        assert_eq!(second.wait, 4);
    }

    #[tokio::test]
    async fn test_assembled_chains_do_not_share_throttle_state() {
        let assembler = Assembler::new();
        let config = parse(
            r#"
            kind = "throttle"
            base_delay = 2
            max_delay = 16
            [next]
            kind = "method_gate"
            allowed = ["cram-md5"]
            [next.next]
            kind = "imap_login"
            host = "127.0.0.1"
            port = 1
            security = "none"
            "#,
        );
        let a = assembler.build(&config).unwrap();
        let b = assembler.build(&config).unwrap();
        let request = Request::new(Method::Plain, "bob", "pw", Protocol::Imap, "1.2.3.4");

        assert_eq!(a.authenticate(&request).await.wait, 2);
        assert_eq!(a.authenticate(&request).await.wait, 4);
        assert_eq!(b.authenticate(&request).await.wait, 2);
    }
}
