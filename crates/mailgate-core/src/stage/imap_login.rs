use std::time::Duration;

use async_trait::async_trait;
use mailgate_imap::{Config, verify_login};
use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::handler::AuthHandler;
use crate::request::{Request, Response};

/// Terminal verifier: tries a real IMAP LOGIN against one backend.
///
/// Has no downstream stage. A successful login yields a bare success with
/// no routing; routing belongs to [`crate::EndpointSelect`].
pub struct ImapLogin {
    endpoint: Endpoint,
    config: Config,
}

impl ImapLogin {
    /// Verifier for `endpoint` with the client's default timeouts.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        let config = Config::builder(endpoint.host())
            .port(endpoint.port())
            .security(endpoint.security())
            .build();
        Self { endpoint, config }
    }

    /// Bounds TCP connect plus any TLS handshake.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Bounds each command exchange.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    /// The backend this verifier talks to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl AuthHandler for ImapLogin {
    async fn authenticate(&self, request: &Request) -> Response {
        match verify_login(&self.config, &request.user, request.password()).await {
            Ok(()) => {
                debug!(endpoint = %self.endpoint, user = %request.user, "login accepted");
                Response::ok()
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, user = %request.user, error = %e, "login failed");
                Response::reject(e.to_string())
            }
        }
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
    use mailgate_imap::Security;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;
    use crate::request::{Method, Protocol};

    fn req(user: &str, pass: &str) -> Request {
        Request::new(Method::Plain, user, pass, Protocol::Imap, "1.2.3.4")
    }

    /// Serves one connection: greets, then answers LOGIN by password.
    async fn backend(password: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();

            write.write_all(b"* OK IMAP4rev1 ready\r\n").await.unwrap();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut parts = line.splitn(3, ' ');
                let tag = parts.next().unwrap_or_default().to_string();
                let command = parts.next().unwrap_or_default().to_ascii_uppercase();
                let reply = match command.as_str() {
                    "LOGIN" if line.ends_with(password) => format!("{tag} OK LOGIN completed\r\n"),
                    "LOGIN" => format!("{tag} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n"),
                    "LOGOUT" => format!("* BYE logging out\r\n{tag} OK LOGOUT completed\r\n"),
                    _ => format!("{tag} BAD unknown command\r\n"),
                };
                write.write_all(reply.as_bytes()).await.unwrap();
                if command == "LOGOUT" {
                    break;
                }
            }
        });

        port
    }

    #[tokio::test]
    async fn test_accepted_login_is_unrouted_success() {
        let port = backend("s3cret").await;
        let login = ImapLogin::new(Endpoint::new("127.0.0.1", port, Security::None));

        let response = login.authenticate(&req("bob", "s3cret")).await;

        assert!(response.is_ok());
        assert!(response.is_unrouted());
    }

    #[tokio::test]
    async fn test_rejected_login_carries_server_text() {
        let port = backend("s3cret").await;
        let login = ImapLogin::new(Endpoint::new("127.0.0.1", port, Security::None));

        let response = login.authenticate(&req("bob", "wrong")).await;

        assert!(!response.is_ok());
        assert!(
            response.status.contains("Invalid credentials"),
            "status: {}",
            response.status
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_rejects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let login = ImapLogin::new(Endpoint::new("127.0.0.1", port, Security::None))
            .connect_timeout(Duration::from_secs(2));

        let response = login.authenticate(&req("bob", "s3cret")).await;

        assert!(!response.is_ok());
        assert!(!response.status.is_empty());
        assert_eq!(response.server, "");
    }
}
