use async_trait::async_trait;
use tracing::debug;

use crate::handler::{AuthHandler, BoxedHandler};
use crate::request::{Request, Response};

/// Rejection text when every alternative failed.
pub const INVALID_CREDENTIALS: &str = "Invalid username or password";

/// Fan-out that accepts the first alternative to succeed.
///
/// Alternatives run one after another in their configured order; later ones
/// are not consulted once one succeeds. The individual failure texts are
/// not forwarded, so a client cannot tell which backend knows the user.
/// With no alternatives every request is rejected.
pub struct AnyOf {
    stages: Vec<BoxedHandler>,
}

impl AnyOf {
    /// Creates a fan-out over `stages`, tried in order.
    #[must_use]
    pub fn new(stages: Vec<BoxedHandler>) -> Self {
        Self { stages }
    }

    /// Number of alternatives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True if there are no alternatives.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[async_trait]
impl AuthHandler for AnyOf {
    async fn authenticate(&self, request: &Request) -> Response {
        for (index, stage) in self.stages.iter().enumerate() {
            let response = stage.authenticate(request).await;
            if response.is_ok() {
                return response;
            }
            debug!(index, status = %response.status, "alternative rejected");
        }
        Response::reject(INVALID_CREDENTIALS)
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
    use std::sync::Arc;

    use super::*;
    use crate::request::{Method, Protocol};
    use crate::stage::testing::{Fixed, PasswordCheck};

    fn req(pass: &str) -> Request {
        Request::new(Method::Plain, "bob", pass, Protocol::Imap, "1.2.3.4")
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let a = Arc::new(PasswordCheck::new("bad1"));
        let b = Arc::new(PasswordCheck::new("s2"));
        let any = AnyOf::new(vec![Box::new(a.clone()), Box::new(b.clone())]);

        let response = any.authenticate(&req("s2")).await;
        assert!(response.is_ok());
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);

        let response = any.authenticate(&req("bad1")).await;
        assert!(response.is_ok());
        assert_eq!(a.calls(), 2);
        // Short-circuited after A.
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_fail_hides_individual_reasons() {
        let a = Fixed::new(Response::reject("user unknown on mx1"));
        let b = Fixed::new(Response::reject("mx2 unreachable"));
        let any = AnyOf::new(vec![Box::new(a), Box::new(b)]);

        let response = any.authenticate(&req("zzz")).await;

        assert_eq!(response.status, INVALID_CREDENTIALS);
        assert_eq!(response.wait, 0);
    }

    #[tokio::test]
    async fn test_success_response_is_returned_unchanged() {
        let routed = Response {
            server: "mx2".to_string(),
            port: 143,
            ..Response::ok()
        };
        let any = AnyOf::new(vec![
            Box::new(Fixed::new(Response::reject("no"))),
            Box::new(Fixed::new(routed.clone())),
        ]);

        assert_eq!(any.authenticate(&req("x")).await, routed);
    }

    #[tokio::test]
    async fn test_empty_rejects() {
        let any = AnyOf::new(Vec::new());

        assert!(any.is_empty());
        assert_eq!(any.authenticate(&req("x")).await.status, INVALID_CREDENTIALS);
    }
}
