//! Parsing of the response lines a login check can receive.
//!
//! Only status responses, CAPABILITY data and continuation requests carry
//! meaning here; any other untagged data is kept as raw text and ignored.

use crate::{Error, Result};

/// Status of a status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command succeeded.
    Ok,
    /// Command failed.
    No,
    /// Command was malformed.
    Bad,
    /// Connection starts already authenticated (greeting only).
    PreAuth,
    /// Server is closing the connection.
    Bye,
}

impl Status {
    fn from_atom(atom: &str) -> Option<Self> {
        match atom.to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "NO" => Some(Self::No),
            "BAD" => Some(Self::Bad),
            "PREAUTH" => Some(Self::PreAuth),
            "BYE" => Some(Self::Bye),
            _ => None,
        }
    }
}

/// A parsed server response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Tagged completion of a command.
    Tagged {
        /// Tag of the command being completed.
        tag: String,
        /// Completion status.
        status: Status,
        /// Human-readable text, including any response code.
        text: String,
    },
    /// Untagged status response (`* OK ...`, `* BYE ...`).
    Status {
        /// Status.
        status: Status,
        /// Capabilities from a `[CAPABILITY ...]` response code, if present.
        capabilities: Option<Vec<String>>,
        /// Human-readable text.
        text: String,
    },
    /// Untagged CAPABILITY data.
    Capability(Vec<String>),
    /// Continuation request (`+ ...`).
    Continuation(String),
    /// Any other untagged data.
    Other(String),
}

impl Response {
    /// Parses one response (CRLF optional).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the line is neither untagged,
    /// a continuation, nor a tagged status response.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let line = String::from_utf8_lossy(bytes);
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(rest) = line.strip_prefix('+') {
            return Ok(Self::Continuation(rest.trim_start().to_string()));
        }

        if let Some(rest) = line.strip_prefix("* ") {
            let (atom, text) = split_atom(rest);

            if atom.eq_ignore_ascii_case("CAPABILITY") {
                return Ok(Self::Capability(split_capabilities(text)));
            }

            return Ok(match Status::from_atom(atom) {
                Some(status) => Self::Status {
                    status,
                    capabilities: capability_code(text),
                    text: text.to_string(),
                },
                None => Self::Other(rest.to_string()),
            });
        }

        let (tag, rest) = split_atom(line);
        let (atom, text) = split_atom(rest);
        match Status::from_atom(atom) {
            Some(status) if !tag.is_empty() => Ok(Self::Tagged {
                tag: tag.to_string(),
                status,
                text: text.to_string(),
            }),
            _ => Err(Error::Protocol(format!("unexpected response: {line}"))),
        }
    }
}

fn split_atom(s: &str) -> (&str, &str) {
    s.split_once(' ').unwrap_or((s, ""))
}

fn split_capabilities(s: &str) -> Vec<String> {
    s.split_ascii_whitespace()
        .map(str::to_ascii_uppercase)
        .collect()
}

/// Extracts the capability list from a leading `[CAPABILITY ...]` code.
fn capability_code(text: &str) -> Option<Vec<String>> {
    let code = text.strip_prefix('[')?;
    let end = code.find(']')?;
    let (atom, list) = split_atom(&code[..end]);
    atom.eq_ignore_ascii_case("CAPABILITY")
        .then(|| split_capabilities(list))
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
    fn test_parse_greeting_with_capabilities() {
        let response =
            Response::parse(b"* OK [CAPABILITY IMAP4rev1 STARTTLS LOGINDISABLED] ready\r\n")
                .unwrap();

        assert_eq!(
            response,
            Response::Status {
                status: Status::Ok,
                capabilities: Some(vec![
                    "IMAP4REV1".to_string(),
                    "STARTTLS".to_string(),
                    "LOGINDISABLED".to_string(),
                ]),
                text: "[CAPABILITY IMAP4rev1 STARTTLS LOGINDISABLED] ready".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_plain_greeting() {
        let response = Response::parse(b"* OK Dovecot ready.\r\n").unwrap();
        assert!(matches!(
            response,
            Response::Status {
                status: Status::Ok,
                capabilities: None,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_bye() {
        let response = Response::parse(b"* BYE too many connections\r\n").unwrap();
        assert!(matches!(response, Response::Status { status: Status::Bye, .. }));
    }

    #[test]
    fn test_parse_capability_data() {
        let response = Response::parse(b"* CAPABILITY IMAP4rev2 AUTH=PLAIN\r\n").unwrap();
        assert_eq!(
            response,
            Response::Capability(vec!["IMAP4REV2".to_string(), "AUTH=PLAIN".to_string()])
        );
    }

    #[test]
    fn test_parse_tagged() {
        let response =
            Response::parse(b"A0001 NO [AUTHENTICATIONFAILED] Authentication failed.\r\n")
                .unwrap();
        assert_eq!(
            response,
            Response::Tagged {
                tag: "A0001".to_string(),
                status: Status::No,
                text: "[AUTHENTICATIONFAILED] Authentication failed.".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_lowercase_status() {
        let response = Response::parse(b"a1 ok done\r\n").unwrap();
        assert!(matches!(response, Response::Tagged { status: Status::Ok, .. }));
    }

    #[test]
    fn test_parse_continuation() {
        assert_eq!(
            Response::parse(b"+ go ahead\r\n").unwrap(),
            Response::Continuation("go ahead".to_string())
        );
    }

    #[test]
    fn test_parse_untagged_data() {
        assert_eq!(
            Response::parse(b"* 3 EXISTS\r\n").unwrap(),
            Response::Other("3 EXISTS".to_string())
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert!(Response::parse(b"HTTP/1.1 400 Bad Request\r\n").is_err());
        assert!(Response::parse(b"\r\n").is_err());
    }
}
