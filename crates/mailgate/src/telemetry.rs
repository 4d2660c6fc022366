//! Log subscriber setup.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const CRATES: [&str; 3] = ["mailgate", "mailgate_core", "mailgate_imap"];

/// Filter directives setting every workspace crate to `level`.
#[must_use]
pub fn directives(level: &str) -> String {
    CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Picks the filter: `-v` flags win, then `RUST_LOG`, then `info`.
#[must_use]
pub fn filter(verbosity: u8) -> EnvFilter {
    match verbosity {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives("info"))),
        1 => EnvFilter::new(directives("debug")),
        _ => EnvFilter::new(directives("trace")),
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// If a global subscriber is already installed.
pub fn init(verbosity: u8) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(verbosity))
        .with(fmt::layer())
        .try_init()
        .context("failed to install tracing subscriber")
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

    #[test]
    fn test_directives() {
        assert_eq!(
            directives("info"),
            "mailgate=info,mailgate_core=info,mailgate_imap=info"
        );
    }

    #[test]
    fn test_verbosity_overrides_env() {
        temp_env::with_var("RUST_LOG", Some("error"), || {
            let debug = filter(1).to_string();
            assert!(debug.contains("mailgate_core=debug"), "{debug}");
            assert!(filter(5).to_string().contains("mailgate_imap=trace"));
            assert_eq!(filter(0).to_string(), "error");
        });
    }

    #[test]
    fn test_default_without_env() {
        temp_env::with_var("RUST_LOG", None::<&str>, || {
            let info = filter(0).to_string();
            for krate in CRATES {
                assert!(info.contains(&format!("{krate}=info")), "{info}");
            }
        });
    }
}
