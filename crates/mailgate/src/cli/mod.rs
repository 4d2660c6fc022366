//! Command-line interface.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_CONFIG: &str = "config";
pub const ARG_LISTEN: &str = "listen";
pub const ARG_VERBOSITY: &str = "verbosity";

/// Options resolved from the command line and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// TOML configuration file.
    pub config: Option<PathBuf>,
    /// Listen address, overriding the configuration file.
    pub listen: Option<SocketAddr>,
    /// Number of `-v` flags.
    pub verbosity: u8,
}

impl Options {
    /// Extracts options from parsed matches.
    #[must_use]
    pub fn from_matches(matches: &clap::ArgMatches) -> Self {
        Self {
            config: matches.get_one::<PathBuf>(ARG_CONFIG).cloned(),
            listen: matches.get_one::<SocketAddr>(ARG_LISTEN).copied(),
            verbosity: matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0),
        }
    }
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("mailgate")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_CONFIG)
                .short('c')
                .long("config")
                .help("Path to the TOML configuration file")
                .env("MAILGATE_CONFIG")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_LISTEN)
                .short('l')
                .long("listen")
                .help("Address to serve the auth endpoint on")
                .long_help(
                    "Address to serve the auth endpoint on. Overrides `listen` from the configuration file.",
                )
                .env("MAILGATE_LISTEN")
                .value_parser(clap::value_parser!(SocketAddr)),
        )
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Increase log verbosity (-v debug, -vv trace); RUST_LOG applies otherwise")
                .action(ArgAction::Count),
        )
}

/// Parses the process arguments.
#[must_use]
pub fn start() -> Options {
    Options::from_matches(&new().get_matches())
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
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "mailgate");
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_defaults() {
        temp_env::with_vars(
            [
                ("MAILGATE_CONFIG", None::<&str>),
                ("MAILGATE_LISTEN", None::<&str>),
            ],
            || {
                let matches = new().get_matches_from(vec!["mailgate"]);
                let options = Options::from_matches(&matches);

                assert_eq!(
                    options,
                    Options {
                        config: None,
                        listen: None,
                        verbosity: 0,
                    }
                );
            },
        );
    }

    #[test]
    fn test_args() {
        let matches = new().get_matches_from(vec![
            "mailgate",
            "--config",
            "/etc/mailgate.toml",
            "--listen",
            "0.0.0.0:9000",
            "-vv",
        ]);
        let options = Options::from_matches(&matches);

        assert_eq!(options.config, Some(PathBuf::from("/etc/mailgate.toml")));
        assert_eq!(options.listen, Some("0.0.0.0:9000".parse().unwrap()));
        assert_eq!(options.verbosity, 2);
    }

    #[test]
    fn test_env() {
        temp_env::with_vars(
            [
                ("MAILGATE_CONFIG", Some("/srv/mailgate.toml")),
                ("MAILGATE_LISTEN", Some("127.0.0.1:8081")),
            ],
            || {
                let matches = new().get_matches_from(vec!["mailgate"]);
                let options = Options::from_matches(&matches);

                assert_eq!(options.config, Some(PathBuf::from("/srv/mailgate.toml")));
                assert_eq!(options.listen, Some("127.0.0.1:8081".parse().unwrap()));
            },
        );
    }

    #[test]
    fn test_invalid_listen() {
        let result = new().try_get_matches_from(vec!["mailgate", "--listen", "not-an-address"]);
        assert!(result.is_err());
    }
}
