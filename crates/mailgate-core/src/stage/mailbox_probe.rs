use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::directory::{Lookup, MailboxDirectory};
use crate::handler::AuthHandler;
use crate::request::{Request, Response};

/// Decorator that rejects users whose mailbox is not provisioned before any
/// backend login is attempted.
///
/// Directory failures reject the attempt; nothing reaches `next` unless the
/// directory positively confirmed the mailbox.
pub struct MailboxProbe<H> {
    directory: Arc<dyn MailboxDirectory>,
    next: H,
}

impl<H: AuthHandler> MailboxProbe<H> {
    /// Wraps `next`, consulting `directory` first.
    pub fn new(directory: Arc<dyn MailboxDirectory>, next: H) -> Self {
        Self { directory, next }
    }
}

/// Splits `mailbox@domain`. Anything without exactly one `@` is refused.
fn split_address(user: &str) -> Option<(&str, &str)> {
    let mut parts = user.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(mailbox), Some(domain), None) => Some((mailbox, domain)),
        _ => None,
    }
}

#[async_trait]
impl<H: AuthHandler> AuthHandler for MailboxProbe<H> {
    async fn authenticate(&self, request: &Request) -> Response {
        let Some((mailbox, domain)) = split_address(&request.user) else {
            debug!(user = %request.user, "user is not an address");
            return Response::reject(format!("invalid username: {}", request.user));
        };

        match self.directory.lookup(mailbox, domain).await {
            Ok(Lookup::Found) => self.next.authenticate(request).await,
            Ok(Lookup::NotFound) => {
                debug!(mailbox, domain, "mailbox not provisioned");
                Response::reject(format!("unknown user: {mailbox}@{domain}"))
            }
            Ok(Lookup::Unexpected(status)) => {
                warn!(mailbox, domain, %status, "unexpected directory answer");
                Response::reject(format!(
                    "directory returned {status} for user {mailbox}@{domain}"
                ))
            }
            Err(e) => {
                warn!(mailbox, domain, error = %e, "directory lookup failed");
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
    use std::sync::Mutex;

    use super::*;
    use crate::error::DirectoryError;
    use crate::request::{Method, Protocol};
    use crate::stage::testing::PasswordCheck;

    /// Directory with a canned answer that records its queries. `None`
    /// fails every lookup.
    struct StubDirectory {
        answer: Option<Lookup>,
        queries: Mutex<Vec<(String, String)>>,
    }

    impl StubDirectory {
        fn new(answer: Lookup) -> Arc<Self> {
            Arc::new(Self {
                answer: Some(answer),
                queries: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                answer: None,
                queries: Mutex::new(Vec::new()),
            })
        }

        fn queries(&self) -> Vec<(String, String)> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailboxDirectory for StubDirectory {
        async fn lookup(&self, mailbox: &str, domain: &str) -> Result<Lookup, DirectoryError> {
            self.queries
                .lock()
                .unwrap()
                .push((mailbox.to_string(), domain.to_string()));
            self.answer
                .clone()
                .ok_or(DirectoryError::InvalidUrl(url::ParseError::EmptyHost))
        }
    }

    fn req(user: &str) -> Request {
        Request::new(Method::Plain, user, "secret", Protocol::Imap, "1.2.3.4")
    }

    #[test]
    fn test_split_address() {
        assert_eq!(split_address("bob@example.com"), Some(("bob", "example.com")));
        assert_eq!(split_address("@example.com"), Some(("", "example.com")));
        assert_eq!(split_address("bob"), None);
        assert_eq!(split_address("a@b@c"), None);
    }

    #[tokio::test]
    async fn test_unknown_user_never_reaches_backend() {
        let directory = StubDirectory::new(Lookup::NotFound);
        let backend = Arc::new(PasswordCheck::new("secret"));
        let stage = MailboxProbe::new(directory.clone(), backend.clone());

        let response = stage.authenticate(&req("bob@example.com")).await;

        assert_eq!(response.status, "unknown user: bob@example.com");
        assert_eq!(
            directory.queries(),
            vec![("bob".to_string(), "example.com".to_string())]
        );
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_found_delegates() {
        let backend = Arc::new(PasswordCheck::new("secret"));
        let stage = MailboxProbe::new(StubDirectory::new(Lookup::Found), backend.clone());

        assert!(stage.authenticate(&req("bob@example.com")).await.is_ok());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_user_skips_directory() {
        let directory = StubDirectory::new(Lookup::Found);
        let stage = MailboxProbe::new(directory.clone(), PasswordCheck::new("secret"));

        let response = stage.authenticate(&req("a@b@c")).await;

        assert_eq!(response.status, "invalid username: a@b@c");
        assert!(directory.queries().is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_status_rejects() {
        let directory = StubDirectory::new(Lookup::Unexpected("503 Service Unavailable".into()));
        let backend = Arc::new(PasswordCheck::new("secret"));
        let stage = MailboxProbe::new(directory, backend.clone());

        let response = stage.authenticate(&req("bob@example.com")).await;

        assert_eq!(
            response.status,
            "directory returned 503 Service Unavailable for user bob@example.com"
        );
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_directory_failure_rejects() {
        let directory = StubDirectory::failing();
        let backend = Arc::new(PasswordCheck::new("secret"));
        let stage = MailboxProbe::new(directory.clone(), backend.clone());

        let response = stage.authenticate(&req("bob@example.com")).await;

        assert!(!response.is_ok());
        assert_eq!(response.status, "invalid base URL: empty host");
        assert_eq!(directory.queries().len(), 1);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_directory_rejects() {
        // Bind then drop to get a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let directory = crate::directory::HttpDirectory::new(
            &format!("http://127.0.0.1:{port}/mailbox"),
            std::time::Duration::from_secs(5),
        )
        .unwrap();
        let backend = Arc::new(PasswordCheck::new("secret"));
        let stage = MailboxProbe::new(Arc::new(directory), backend.clone());

        let response = stage.authenticate(&req("bob@example.com")).await;

        assert!(!response.is_ok());
        assert!(response.status.starts_with("HTTP error"));
        assert_eq!(backend.calls(), 0);
    }
}
