//! Request and response values exchanged with the chain.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Status text of a successful decision.
pub const AUTH_STATUS_OK: &str = "OK";

/// Declared authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    /// Missing or unsupported mechanism.
    #[default]
    Other,
    /// PLAIN or LOGIN: the password is available in clear.
    Plain,
    /// CRAM-MD5.
    CramMd5,
    /// DIGEST-MD5.
    DigestMd5,
}

impl Method {
    /// Maps an `Auth-Method` header value. Unknown values map to `Other`.
    #[must_use]
    pub fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "plain" | "login" => Self::Plain,
            "cram-md5" => Self::CramMd5,
            "digest-md5" => Self::DigestMd5,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Other => "other",
            Self::Plain => "plain",
            Self::CramMd5 => "cram-md5",
            Self::DigestMd5 => "digest-md5",
        })
    }
}

/// Mail protocol the client is speaking to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Missing or unsupported protocol.
    #[default]
    Other,
    /// IMAP.
    Imap,
    /// POP3.
    Pop3,
    /// SMTP.
    Smtp,
}

impl Protocol {
    /// Maps an `Auth-Protocol` header value. Unknown values map to `Other`.
    #[must_use]
    pub fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "imap" => Self::Imap,
            "pop3" => Self::Pop3,
            "smtp" => Self::Smtp,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Other => "other",
            Self::Imap => "imap",
            Self::Pop3 => "pop3",
            Self::Smtp => "smtp",
        })
    }
}

/// One authentication attempt, as forwarded by the proxy.
///
/// Stages only ever see `&Request`. The password is kept in a
/// [`SecretString`] so it never shows up in `Debug` output.
#[derive(Debug)]
pub struct Request {
    /// Declared mechanism.
    pub method: Method,
    /// Login name as typed by the client.
    pub user: String,
    password: SecretString,
    /// Requested protocol.
    pub protocol: Protocol,
    /// Client address; only used as the throttle key.
    pub client_ip: String,
}

impl Request {
    /// Creates a request.
    #[must_use]
    pub fn new(
        method: Method,
        user: impl Into<String>,
        password: impl Into<String>,
        protocol: Protocol,
        client_ip: impl Into<String>,
    ) -> Self {
        Self {
            method,
            user: user.into(),
            password: SecretString::from(password.into()),
            protocol,
            client_ip: client_ip.into(),
        }
    }

    /// The clear-text password. Never log the returned value.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Decision rendered by the chain.
///
/// `wait` is only meaningful on rejection; `server`/`port` only on success.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    /// [`AUTH_STATUS_OK`] or a human-readable rejection.
    pub status: String,
    /// Seconds the client must wait before retrying.
    pub wait: u32,
    /// Backend host, empty unless routed.
    pub server: String,
    /// Backend port, zero unless routed.
    pub port: u16,
}

impl Response {
    /// A bare success, not yet routed.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: AUTH_STATUS_OK.to_string(),
            ..Self::default()
        }
    }

    /// A rejection carrying `status`.
    #[must_use]
    pub fn reject(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    /// True when the status equals the success sentinel.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == AUTH_STATUS_OK
    }

    /// True for a success that no stage routed to a backend.
    #[must_use]
    pub fn is_unrouted(&self) -> bool {
        self.is_ok() && (self.server.is_empty() || self.port == 0)
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

    #[test]
    fn test_method_from_header() {
        assert_eq!(Method::from_header("plain"), Method::Plain);
        assert_eq!(Method::from_header("LOGIN"), Method::Plain);
        assert_eq!(Method::from_header("CRAM-MD5"), Method::CramMd5);
        assert_eq!(Method::from_header("digest-md5"), Method::DigestMd5);
        assert_eq!(Method::from_header("apop"), Method::Other);
        assert_eq!(Method::from_header(""), Method::Other);
    }

    #[test]
    fn test_protocol_from_header() {
        assert_eq!(Protocol::from_header("imap"), Protocol::Imap);
        assert_eq!(Protocol::from_header("POP3"), Protocol::Pop3);
        assert_eq!(Protocol::from_header("smtp"), Protocol::Smtp);
        assert_eq!(Protocol::from_header("nntp"), Protocol::Other);
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::Imap.to_string(), "imap");
        assert_eq!(Protocol::Other.to_string(), "other");
    }

    #[test]
    fn test_request_debug_hides_password() {
        let request = Request::new(Method::Plain, "bob", "hunter2", Protocol::Imap, "1.2.3.4");
        let rendered = format!("{request:?}");

        assert!(rendered.contains("bob"));
        assert!(!rendered.contains("hunter2"));
        assert_eq!(request.password(), "hunter2");
    }

    #[test]
    fn test_response_constructors() {
        assert!(Response::ok().is_ok());
        assert!(Response::ok().is_unrouted());

        let rejected = Response::reject("nope");
        assert!(!rejected.is_ok());
        assert!(!rejected.is_unrouted());
        assert_eq!(rejected.wait, 0);

        let routed = Response {
            server: "mx1".to_string(),
            port: 143,
            ..Response::ok()
        };
        assert!(!routed.is_unrouted());
    }

    #[test]
    fn test_method_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            methods: Vec<Method>,
        }

        let parsed: Wrapper =
            toml::from_str(r#"methods = ["plain", "cram-md5", "digest-md5"]"#).unwrap();
        assert_eq!(
            parsed.methods,
            vec![Method::Plain, Method::CramMd5, Method::DigestMd5]
        );
    }
}
