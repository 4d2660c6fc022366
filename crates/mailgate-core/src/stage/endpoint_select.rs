use async_trait::async_trait;
use tracing::{debug, warn};

use crate::endpoint::Endpoints;
use crate::handler::AuthHandler;
use crate::request::{Request, Response};

/// Decorator that routes a successful attempt to the backend for its
/// protocol.
///
/// Rejections from `next` are passed through untouched. A success for a
/// protocol with no configured endpoint is turned into a rejection, so a
/// valid credential can still be refused for the protocol it asked for.
pub struct EndpointSelect<H> {
    endpoints: Endpoints,
    next: H,
}

impl<H: AuthHandler> EndpointSelect<H> {
    /// Wraps `next`, routing by `endpoints`.
    pub const fn new(endpoints: Endpoints, next: H) -> Self {
        Self { endpoints, next }
    }
}

#[async_trait]
impl<H: AuthHandler> AuthHandler for EndpointSelect<H> {
    async fn authenticate(&self, request: &Request) -> Response {
        let mut response = self.next.authenticate(request).await;
        if !response.is_ok() {
            return response;
        }

        let Some(endpoint) = self.endpoints.get(request.protocol) else {
            warn!(protocol = %request.protocol, user = %request.user, "no endpoint for protocol");
            return Response::reject(format!("Unsupported protocol: {}", request.protocol));
        };

        debug!(%endpoint, user = %request.user, "routing");
        response.server = endpoint.host().to_string();
        response.port = endpoint.port();
        response
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

    use mailgate_imap::Security;

    use super::*;
    use crate::endpoint::Endpoint;
    use crate::request::{Method, Protocol};
    use crate::stage::testing::PasswordCheck;

    fn endpoints() -> Endpoints {
        Endpoints::try_from_iter([
            (Protocol::Imap, Endpoint::new("imap.internal", 143, Security::None)),
            (Protocol::Smtp, Endpoint::new("smtp.internal", 25, Security::None)),
        ])
        .unwrap()
    }

    fn req(pass: &str, protocol: Protocol) -> Request {
        Request::new(Method::Plain, "bob", pass, protocol, "1.2.3.4")
    }

    #[tokio::test]
    async fn test_success_is_routed() {
        let select = EndpointSelect::new(endpoints(), PasswordCheck::new("secret"));

        let response = select.authenticate(&req("secret", Protocol::Imap)).await;
        assert!(response.is_ok());
        assert_eq!(response.server, "imap.internal");
        assert_eq!(response.port, 143);

        let response = select.authenticate(&req("secret", Protocol::Smtp)).await;
        assert_eq!(response.server, "smtp.internal");
        assert_eq!(response.port, 25);
    }

    #[tokio::test]
    async fn test_valid_credential_for_unrouted_protocol_rejected() {
        let backend = Arc::new(PasswordCheck::new("secret"));
        let select = EndpointSelect::new(endpoints(), backend.clone());

        let response = select.authenticate(&req("secret", Protocol::Pop3)).await;

        assert_eq!(response.status, "Unsupported protocol: pop3");
        assert_eq!(response.server, "");
        assert_eq!(response.port, 0);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejection_for_unrouted_protocol_passes_through() {
        let select = EndpointSelect::new(endpoints(), PasswordCheck::new("secret"));

        let response = select.authenticate(&req("wrong", Protocol::Pop3)).await;

        assert_eq!(response.status, "Invalid login or password");
    }

    #[tokio::test]
    async fn test_rejection_is_not_routed() {
        let select = EndpointSelect::new(endpoints(), PasswordCheck::new("secret"));

        let response = select.authenticate(&req("wrong", Protocol::Imap)).await;

        assert!(!response.is_ok());
        assert_eq!(response.status, "Invalid login or password");
        assert_eq!(response.server, "");
        assert_eq!(response.port, 0);
    }
}
