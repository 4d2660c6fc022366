//! Mailbox directory lookups.
//!
//! The directory answers one question before any backend login is tried:
//! is `mailbox@domain` provisioned at all?

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::error::DirectoryError;

/// Outcome of a directory lookup that reached the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The mailbox exists.
    Found,
    /// The directory does not know the mailbox.
    NotFound,
    /// Any other answer, with the raw status line (e.g. `503 Service Unavailable`).
    Unexpected(String),
}

/// A source of truth for provisioned mailboxes.
#[async_trait]
pub trait MailboxDirectory: Send + Sync {
    /// Looks up `mailbox` in `domain`.
    ///
    /// # Errors
    ///
    /// Transport failures. Callers must treat them as a rejection.
    async fn lookup(&self, mailbox: &str, domain: &str) -> Result<Lookup, DirectoryError>;
}

/// Directory reached over HTTP: `GET <base>?mailbox=<m>&domain=<d>`.
///
/// `200` means found, `404` means not found.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpDirectory {
    /// Creates a directory client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` does not parse or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let base_url = Url::parse(base_url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    /// Lookup URL for one mailbox; query values are percent-encoded.
    #[must_use]
    pub fn lookup_url(&self, mailbox: &str, domain: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("mailbox", mailbox)
            .append_pair("domain", domain);
        url
    }
}

#[async_trait]
impl MailboxDirectory for HttpDirectory {
    async fn lookup(&self, mailbox: &str, domain: &str) -> Result<Lookup, DirectoryError> {
        let response = self
            .client
            .get(self.lookup_url(mailbox, domain))
            .send()
            .await?;

        let status = response.status();
        debug!(%status, mailbox, domain, "directory answered");

        Ok(match status {
            StatusCode::OK => Lookup::Found,
            StatusCode::NOT_FOUND => Lookup::NotFound,
            other => Lookup::Unexpected(other.to_string()),
        })
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
    fn test_lookup_url_encodes_values() {
        let directory =
            HttpDirectory::new("http://directory.internal/check", Duration::from_secs(1)).unwrap();

        let url = directory.lookup_url("bob&x", "example.com");

        assert_eq!(
            url.as_str(),
            "http://directory.internal/check?mailbox=bob%26x&domain=example.com"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpDirectory::new("not a url", Duration::from_secs(1));
        assert!(matches!(result, Err(DirectoryError::InvalidUrl(_))));
    }
}
