use std::collections::HashSet;

use async_trait::async_trait;
use tracing::debug;

use crate::error::TopologyError;
use crate::handler::AuthHandler;
use crate::request::{Method, Request, Response};

/// Rejection text for a mechanism outside the allowed set.
pub const METHOD_NOT_SUPPORTED: &str = "Authentication method not supported";

/// Decorator that only lets allowed mechanisms reach the rest of the chain.
///
/// Backends verify clear-text passwords, so challenge-response mechanisms
/// have to be stopped here.
pub struct MethodGate<H> {
    allowed: HashSet<Method>,
    next: H,
}

impl<H: AuthHandler> MethodGate<H> {
    /// Wraps `next`, allowing only `allowed`.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::EmptyMethods`] if `allowed` is empty.
    pub fn new(allowed: impl IntoIterator<Item = Method>, next: H) -> Result<Self, TopologyError> {
        let allowed: HashSet<Method> = allowed.into_iter().collect();
        if allowed.is_empty() {
            return Err(TopologyError::EmptyMethods("method_gate".to_string()));
        }
        Ok(Self { allowed, next })
    }

    /// True if `method` passes the gate.
    #[must_use]
    pub fn allows(&self, method: Method) -> bool {
        self.allowed.contains(&method)
    }
}

#[async_trait]
impl<H: AuthHandler> AuthHandler for MethodGate<H> {
    async fn authenticate(&self, request: &Request) -> Response {
        if !self.allows(request.method) {
            debug!(method = %request.method, user = %request.user, "method rejected");
            return Response::reject(METHOD_NOT_SUPPORTED);
        }
        self.next.authenticate(request).await
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
    use crate::request::Protocol;
    use crate::stage::testing::PasswordCheck;

    fn req(method: Method) -> Request {
        Request::new(method, "bob", "secret", Protocol::Imap, "1.2.3.4")
    }

    #[tokio::test]
    async fn test_disallowed_method_short_circuits() {
        let backend = Arc::new(PasswordCheck::new("secret"));
        let gate = MethodGate::new([Method::Plain], backend.clone()).unwrap();

        let response = gate.authenticate(&req(Method::CramMd5)).await;

        assert_eq!(response.status, METHOD_NOT_SUPPORTED);
        assert_eq!(response.wait, 0);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let backend = Arc::new(PasswordCheck::new("secret"));
        let gate = MethodGate::new([Method::Plain], backend.clone()).unwrap();

        let response = gate.authenticate(&req(Method::Other)).await;

        assert_eq!(response.status, METHOD_NOT_SUPPORTED);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_allowed_method_passes_through() {
        let backend = Arc::new(PasswordCheck::new("secret"));
        let gate = MethodGate::new([Method::Plain, Method::CramMd5], backend.clone()).unwrap();

        assert!(gate.authenticate(&req(Method::Plain)).await.is_ok());
        assert!(gate.authenticate(&req(Method::CramMd5)).await.is_ok());
        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn test_empty_allowed_set_rejected() {
        let result = MethodGate::new([], PasswordCheck::new("secret"));
        assert!(matches!(result, Err(TopologyError::EmptyMethods(_))));
    }
}
