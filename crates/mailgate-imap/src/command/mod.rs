//! IMAP commands needed to verify a login.

mod tag_generator;

pub use tag_generator::TagGenerator;

use crate::{Error, Result};

/// Commands the verifier sends.
#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    /// CAPABILITY command.
    Capability,
    /// STARTTLS command.
    StartTls,
    /// LOGIN command.
    Login {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// LOGOUT command.
    Logout,
}

impl Command {
    /// Serializes the command with the given tag, CRLF terminated.
    ///
    /// Arguments with 8-bit bytes are sent as literals. The result is split
    /// at every synchronizing literal: each segment but the last ends with a
    /// `{n}` header, and the server's continuation request must be read
    /// before the next segment is written. With `literal_plus` the headers
    /// are `{n+}` and the whole command is a single segment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when a LOGIN argument contains
    /// CR, LF or NUL.
    pub fn serialize(&self, tag: &str, literal_plus: bool) -> Result<Vec<Vec<u8>>> {
        let mut segments = Vec::new();
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(tag.as_bytes());
        buf.push(b' ');

        match self {
            Self::Capability => buf.extend_from_slice(b"CAPABILITY"),
            Self::StartTls => buf.extend_from_slice(b"STARTTLS"),
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_astring(&mut segments, &mut buf, username, literal_plus)?;
                buf.push(b' ');
                write_astring(&mut segments, &mut buf, password, literal_plus)?;
            }
        }

        buf.extend_from_slice(b"\r\n");
        segments.push(buf);
        Ok(segments)
    }

    /// Name used in log output. LOGIN arguments are never included.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::StartTls => "STARTTLS",
            Self::Login { .. } => "LOGIN",
            Self::Logout => "LOGOUT",
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Login { username, .. } => f
                .debug_struct("Login")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// Writes an astring: a bare atom when possible, a quoted string for
/// 7-bit text, otherwise a literal.
fn write_astring(
    segments: &mut Vec<Vec<u8>>,
    buf: &mut Vec<u8>,
    s: &str,
    literal_plus: bool,
) -> Result<()> {
    if s.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0)) {
        return Err(Error::InvalidArgument(
            "CR, LF and NUL are not allowed in credentials".to_string(),
        ));
    }

    if !s.is_ascii() {
        if literal_plus {
            buf.extend_from_slice(format!("{{{}+}}\r\n", s.len()).as_bytes());
        } else {
            buf.extend_from_slice(format!("{{{}}}\r\n", s.len()).as_bytes());
            segments.push(std::mem::take(buf));
        }
        buf.extend_from_slice(s.as_bytes());
    } else if s.is_empty() || s.bytes().any(needs_quoting) {
        buf.push(b'"');
        for b in s.bytes() {
            if b == b'"' || b == b'\\' {
                buf.push(b'\\');
            }
            buf.push(b);
        }
        buf.push(b'"');
    } else {
        buf.extend_from_slice(s.as_bytes());
    }

    Ok(())
}

/// Returns true if the byte cannot appear in an atom.
const fn needs_quoting(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*' | b']'
    ) || b < 0x20
        || b == 0x7F
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

    fn login(username: &str, password: &str) -> Command {
        Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Single-segment wire form.
    fn wire(command: &Command, tag: &str) -> Vec<u8> {
        let mut segments = command.serialize(tag, false).unwrap();
        assert_eq!(segments.len(), 1);
        segments.remove(0)
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(
            wire(&Command::Capability, "A0001"),
            b"A0001 CAPABILITY\r\n"
        );
        assert_eq!(
            wire(&Command::StartTls, "A0002"),
            b"A0002 STARTTLS\r\n"
        );
        assert_eq!(
            wire(&Command::Logout, "A0003"),
            b"A0003 LOGOUT\r\n"
        );
    }

    #[test]
    fn test_login_atoms() {
        assert_eq!(
            wire(&login("bob@example.com", "secret"), "A0001"),
            b"A0001 LOGIN bob@example.com secret\r\n"
        );
    }

    #[test]
    fn test_login_quotes_specials() {
        assert_eq!(
            wire(&login("bob", "pass word"), "A0001"),
            b"A0001 LOGIN bob \"pass word\"\r\n"
        );
        assert_eq!(
            wire(&login("bob", "a\"b\\c"), "A0001"),
            b"A0001 LOGIN bob \"a\\\"b\\\\c\"\r\n"
        );
        assert_eq!(
            wire(&login("", "x"), "A0001"),
            b"A0001 LOGIN \"\" x\r\n"
        );
    }

    #[test]
    fn test_login_rejects_line_breaks() {
        let result = login("bob", "pw\r\nA0002 LOGOUT").serialize("A0001", false);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_login_eight_bit_uses_literal() {
        let segments = login("bob", "pässwörd").serialize("A0001", false).unwrap();

        assert_eq!(
            segments,
            vec![
                b"A0001 LOGIN bob {10}\r\n".to_vec(),
                "pässwörd\r\n".as_bytes().to_vec(),
            ]
        );
    }

    #[test]
    fn test_login_both_literals() {
        let segments = login("jürgen", "pässwörd").serialize("A0001", false).unwrap();

        assert_eq!(
            segments,
            vec![
                b"A0001 LOGIN {7}\r\n".to_vec(),
                "jürgen {10}\r\n".as_bytes().to_vec(),
                "pässwörd\r\n".as_bytes().to_vec(),
            ]
        );
    }

    #[test]
    fn test_login_literal_plus_is_one_segment() {
        let segments = login("bob", "pässwörd").serialize("A0001", true).unwrap();

        assert_eq!(
            segments,
            vec!["A0001 LOGIN bob {10+}\r\npässwörd\r\n".as_bytes().to_vec()]
        );
    }

    #[test]
    fn test_login_delete_byte_is_quoted() {
        assert_eq!(
            wire(&login("bob", "a\u{7f}b"), "A0001"),
            b"A0001 LOGIN bob \"a\x7fb\"\r\n"
        );
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", login("bob", "secret"));
        assert!(rendered.contains("bob"));
        assert!(!rendered.contains("secret"));
        assert_eq!(login("bob", "secret").name(), "LOGIN");
    }
}
