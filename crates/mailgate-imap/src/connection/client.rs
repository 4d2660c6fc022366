//! Type-state IMAP client connection.
//!
//! Only the transitions a credential check needs are modelled:
//!
//! - `NotAuthenticated`: after the greeting; STARTTLS and LOGIN are valid
//! - `Authenticated`: after a successful LOGIN; only LOGOUT is offered

#![allow(clippy::missing_errors_doc)]

use std::marker::PhantomData;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use super::framed::FramedStream;
use super::stream::ImapStream;
use crate::command::{Command, TagGenerator};
use crate::response::{Response, Status};
use crate::{Error, Result};

/// Marker type for the not-authenticated state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotAuthenticated;

/// Marker type for the authenticated state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

/// IMAP client connection with type-state.
pub struct Client<S, State> {
    stream: FramedStream<S>,
    tag_gen: TagGenerator,
    capabilities: Vec<String>,
    io_timeout: Option<Duration>,
    _state: PhantomData<State>,
}

impl<S, State> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("tag_gen", &self.tag_gen)
            .field("capabilities", &self.capabilities)
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Capabilities learned from the greeting or later responses (uppercased).
    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Checks if the server advertised a capability.
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(capability))
    }

    /// Bounds every subsequent command/response exchange.
    #[must_use]
    pub const fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// Sends a command and waits for its tagged completion.
    ///
    /// Untagged CAPABILITY data seen on the way is recorded. A non-OK
    /// completion is turned into the matching error, including one that
    /// arrives in place of a literal continuation.
    async fn execute(&mut self, command: &Command) -> Result<()> {
        let tag = self.tag_gen.next_tag();
        let segments = command.serialize(&tag, self.has_capability("LITERAL+"))?;
        trace!(command = command.name(), %tag, "sending");

        let io_timeout = self.io_timeout;
        let stream = &mut self.stream;
        let exchange = async {
            let (last, leading) = segments
                .split_last()
                .ok_or_else(|| Error::Protocol("empty command".to_string()))?;
            for segment in leading {
                stream.write_command(segment).await?;
                if let Some(lines) = stream.read_continuation(&tag).await? {
                    return Ok(lines);
                }
            }
            stream.write_command(last).await?;
            stream.read_until_tagged(&tag).await
        };

        let lines = match io_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| Error::Timeout(limit))??,
            None => exchange.await?,
        };

        let mut outcome = Err(Error::Protocol("missing tagged response".to_string()));
        for line in &lines {
            match Response::parse(line)? {
                Response::Capability(caps) => self.capabilities = caps,
                Response::Tagged { status, text, .. } => {
                    outcome = match status {
                        Status::Ok => Ok(()),
                        Status::No => Err(Error::No(text)),
                        Status::Bad => Err(Error::Bad(text)),
                        Status::Bye | Status::PreAuth => Err(Error::Protocol(format!(
                            "unexpected tagged status: {text}"
                        ))),
                    };
                }
                Response::Status {
                    status: Status::Bye,
                    text,
                    ..
                } if command != &Command::Logout => return Err(Error::Bye(text)),
                _ => {}
            }
        }

        debug!(command = command.name(), ok = outcome.is_ok(), "completed");
        outcome
    }

    fn transition<Next>(self) -> Client<S, Next> {
        Client {
            stream: self.stream,
            tag_gen: self.tag_gen,
            capabilities: self.capabilities,
            io_timeout: self.io_timeout,
            _state: PhantomData,
        }
    }
}

impl<S> Client<S, NotAuthenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new client from a connected stream.
    ///
    /// Reads the server greeting and any capabilities it carries. A BYE
    /// greeting or a PREAUTH greeting (which would skip the credential
    /// check entirely) is an error.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut framed = FramedStream::new(stream);

        let greeting = framed.read_line().await?;
        let capabilities = match Response::parse(&greeting)? {
            Response::Status {
                status: Status::Ok,
                capabilities,
                ..
            } => capabilities.unwrap_or_default(),
            Response::Status {
                status: Status::Bye,
                text,
                ..
            } => return Err(Error::Bye(text)),
            Response::Status {
                status: Status::PreAuth,
                ..
            } => {
                return Err(Error::InvalidState(
                    "server greeted with PREAUTH".to_string(),
                ));
            }
            _ => {
                return Err(Error::Protocol(format!(
                    "unexpected greeting: {}",
                    String::from_utf8_lossy(&greeting).trim_end()
                )));
            }
        };

        Ok(Self {
            stream: framed,
            tag_gen: TagGenerator::default(),
            capabilities,
            io_timeout: None,
            _state: PhantomData,
        })
    }

    /// Refreshes the capability list.
    pub async fn capability(&mut self) -> Result<&[String]> {
        self.execute(&Command::Capability).await?;
        Ok(&self.capabilities)
    }

    /// Authenticates with LOGIN.
    ///
    /// Consumes self and returns an authenticated client on success.
    pub async fn login(mut self, username: &str, password: &str) -> Result<Client<S, Authenticated>> {
        if self.has_capability("LOGINDISABLED") {
            return Err(Error::LoginDisabled);
        }

        self.execute(&Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await?;

        Ok(self.transition())
    }
}

impl Client<ImapStream, NotAuthenticated> {
    /// Upgrades the connection with STARTTLS.
    ///
    /// Capabilities learned before the upgrade are discarded, as the server
    /// may advertise a different set over TLS.
    pub async fn starttls(mut self, host: &str) -> Result<Self> {
        if self.stream_is_tls() {
            return Err(Error::InvalidState("stream is already TLS".to_string()));
        }

        self.execute(&Command::StartTls).await?;

        let stream = self.stream.into_inner().upgrade_to_tls(host).await?;
        Ok(Self {
            stream: FramedStream::new(stream),
            tag_gen: self.tag_gen,
            capabilities: Vec::new(),
            io_timeout: self.io_timeout,
            _state: PhantomData,
        })
    }

    fn stream_is_tls(&self) -> bool {
        self.stream.get_ref().is_tls()
    }
}

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Gracefully disconnects from the server.
    pub async fn logout(mut self) -> Result<()> {
        self.execute(&Command::Logout).await
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
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_greeting_capabilities() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] Dovecot ready.\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();

        assert!(client.has_capability("imap4rev1"));
        assert!(client.has_capability("AUTH=PLAIN"));
        assert!(!client.has_capability("STARTTLS"));
    }

    #[tokio::test]
    async fn test_bye_greeting() {
        let mock = Builder::new().read(b"* BYE overloaded\r\n").build();

        let err = Client::from_stream(mock).await.unwrap_err();
        assert!(matches!(err, Error::Bye(text) if text == "overloaded"));
    }

    #[tokio::test]
    async fn test_preauth_greeting_is_rejected() {
        let mock = Builder::new().read(b"* PREAUTH welcome\r\n").build();

        let err = Client::from_stream(mock).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_login_and_logout() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN bob secret\r\n")
            .read(b"* CAPABILITY IMAP4rev1 IDLE\r\n")
            .read(b"A0001 OK Logged in\r\n")
            .write(b"A0002 LOGOUT\r\n")
            .read(b"* BYE Logging out\r\n")
            .read(b"A0002 OK Logout completed\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let client = client.login("bob", "secret").await.unwrap();
        assert!(client.has_capability("IDLE"));
        client.logout().await.unwrap();
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN bob wrong\r\n")
            .read(b"A0001 NO [AUTHENTICATIONFAILED] Authentication failed.\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let err = client.login("bob", "wrong").await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "Server returned NO: [AUTHENTICATIONFAILED] Authentication failed."
        );
    }

    #[tokio::test]
    async fn test_login_eight_bit_password_waits_for_continuation() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN bob {10}\r\n")
            .read(b"+ Ready for literal data\r\n")
            .write("pässwörd\r\n".as_bytes())
            .read(b"A0001 OK Logged in\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        client.login("bob", "pässwörd").await.unwrap();
    }

    #[tokio::test]
    async fn test_login_literal_plus_skips_continuation() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 LITERAL+] ready\r\n")
            .write("A0001 LOGIN bob {10+}\r\npässwörd\r\n".as_bytes())
            .read(b"A0001 OK Logged in\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        client.login("bob", "pässwörd").await.unwrap();
    }

    #[tokio::test]
    async fn test_login_literal_refused() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN bob {10}\r\n")
            .read(b"A0001 BAD literal too long\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let err = client.login("bob", "pässwörd").await.unwrap_err();

        assert!(matches!(err, Error::Bad(text) if text == "literal too long"));
    }

    #[tokio::test]
    async fn test_login_disabled() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 STARTTLS LOGINDISABLED] ready\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let err = client.login("bob", "secret").await.unwrap_err();

        assert!(matches!(err, Error::LoginDisabled));
    }

    #[tokio::test]
    async fn test_capability_refresh() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 CAPABILITY\r\n")
            .read(b"* CAPABILITY IMAP4rev2 STARTTLS\r\n")
            .read(b"A0001 OK done\r\n")
            .build();

        let mut client = Client::from_stream(mock).await.unwrap();
        let caps = client.capability().await.unwrap().to_vec();

        assert_eq!(caps, vec!["IMAP4REV2".to_string(), "STARTTLS".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_io_timeout() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN bob secret\r\n")
            .wait(Duration::from_secs(60))
            .build();

        let client = Client::from_stream(mock)
            .await
            .unwrap()
            .with_io_timeout(Duration::from_secs(5));
        let err = client.login("bob", "secret").await.unwrap_err();

        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(5)));
    }
}
