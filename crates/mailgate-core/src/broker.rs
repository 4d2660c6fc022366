//! Top-level dispatcher.

use tracing::{info, warn};

use crate::handler::{AuthHandler, BoxedHandler};
use crate::request::{Request, Response};

/// Owns the assembled chain and answers authentication requests with it.
///
/// The broker is immutable once built and is shared across request tasks
/// behind an `Arc`.
pub struct Broker {
    chain: BoxedHandler,
}

impl Broker {
    /// Creates a broker around `chain`.
    pub fn new(chain: impl AuthHandler + 'static) -> Self {
        Self {
            chain: Box::new(chain),
        }
    }

    /// Creates a broker around an already boxed chain.
    #[must_use]
    pub fn from_boxed(chain: BoxedHandler) -> Self {
        Self { chain }
    }

    /// Runs `request` through the chain.
    pub async fn authenticate(&self, request: &Request) -> Response {
        let response = self.chain.authenticate(request).await;

        if response.is_unrouted() {
            warn!(
                user = %request.user,
                protocol = %request.protocol,
                "authenticated without a backend endpoint"
            );
        }

        info!(
            client_ip = %request.client_ip,
            user = %request.user,
            protocol = %request.protocol,
            method = %request.method,
            status = %response.status,
            wait = response.wait,
            "auth decision"
        );

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
    use mailgate_imap::Security;

    use super::*;
    use crate::endpoint::{Endpoint, Endpoints};
    use crate::request::{Method, Protocol};
    use crate::stage::testing::PasswordCheck;
    use crate::stage::{
        AnyOf, DelayCacheFactory, EndpointSelect, MethodGate, Throttle, ThrottlePolicy,
    };

    fn broker() -> Broker {
        let endpoints = Endpoints::try_from_iter([(
            Protocol::Imap,
            Endpoint::new("imap.internal", 143, Security::None),
        )])
        .unwrap();

        let chain = Throttle::new(
            ThrottlePolicy::new(2, 16).unwrap(),
            &DelayCacheFactory::new(),
            MethodGate::new(
                [Method::Plain],
                EndpointSelect::new(
                    endpoints,
                    AnyOf::new(vec![
                        Box::new(PasswordCheck::new("bad1")),
                        Box::new(PasswordCheck::new("s2")),
                    ]),
                ),
            )
            .unwrap(),
        );
        Broker::new(chain)
    }

    fn req(method: Method, pass: &str) -> Request {
        Request::new(method, "bob", pass, Protocol::Imap, "10.0.0.7")
    }

    #[tokio::test]
    async fn test_full_chain_success_is_routed() {
        let response = broker().authenticate(&req(Method::Plain, "s2")).await;

        assert!(response.is_ok());
        assert_eq!(response.server, "imap.internal");
        assert_eq!(response.port, 143);
        assert_eq!(response.wait, 0);
    }

    #[tokio::test]
    async fn test_full_chain_failures_back_off() {
        let broker = broker();

        let first = broker.authenticate(&req(Method::Plain, "zzz")).await;
        assert_eq!(first.status, "Invalid username or password");
        assert_eq!(first.wait, 2);

        // Gate rejections are failures too, so the throttle charges them.
        let second = broker.authenticate(&req(Method::CramMd5, "s2")).await;
        assert_eq!(second.status, "Authentication method not supported");
        assert_eq!(second.wait, 4);
    }

    #[tokio::test]
    async fn test_unrouted_success_still_returned() {
        let broker = Broker::new(PasswordCheck::new("s2"));

        let response = broker.authenticate(&req(Method::Plain, "s2")).await;

        assert!(response.is_unrouted());
    }
}
