//! HTTP bridge between a mail proxy's `auth_http` requests and the broker.
//!
//! The proxy sends the attempt as request headers and reads the verdict
//! back from response headers; the body is always empty.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use mailgate_core::{Broker, Method, Protocol, Request, Response};
use tokio::net::TcpListener;
use tracing::info;

pub const AUTH_METHOD: HeaderName = HeaderName::from_static("auth-method");
pub const AUTH_USER: HeaderName = HeaderName::from_static("auth-user");
pub const AUTH_PASS: HeaderName = HeaderName::from_static("auth-pass");
pub const AUTH_PROTOCOL: HeaderName = HeaderName::from_static("auth-protocol");
pub const CLIENT_IP: HeaderName = HeaderName::from_static("client-ip");

pub const AUTH_STATUS: HeaderName = HeaderName::from_static("auth-status");
pub const AUTH_SERVER: HeaderName = HeaderName::from_static("auth-server");
pub const AUTH_PORT: HeaderName = HeaderName::from_static("auth-port");
pub const AUTH_WAIT: HeaderName = HeaderName::from_static("auth-wait");

/// Router answering every path with an auth decision.
pub fn router(broker: Arc<Broker>) -> Router {
    Router::new().fallback(authenticate).with_state(broker)
}

/// Serves `broker` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// If the server fails while accepting connections.
pub async fn serve<F>(listener: TcpListener, broker: Arc<Broker>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(address) = listener.local_addr() {
        info!(%address, "auth endpoint listening");
    }
    axum::serve(listener, router(broker))
        .with_graceful_shutdown(shutdown)
        .await
        .context("auth endpoint failed")
}

async fn authenticate(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
) -> (StatusCode, HeaderMap) {
    let request = parse_request(&headers);
    let response = broker.authenticate(&request).await;
    (StatusCode::OK, render_response(&response))
}

fn header(headers: &HeaderMap, name: &HeaderName) -> String {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default()
}

/// Builds a request from proxy headers. Missing headers read as empty.
///
/// nginx URL-escapes `Auth-User` and `Auth-Pass`; both are passed through
/// verbatim, without decoding.
#[must_use]
pub fn parse_request(headers: &HeaderMap) -> Request {
    Request::new(
        Method::from_header(&header(headers, &AUTH_METHOD)),
        header(headers, &AUTH_USER),
        header(headers, &AUTH_PASS),
        Protocol::from_header(&header(headers, &AUTH_PROTOCOL)),
        header(headers, &CLIENT_IP),
    )
}

/// Control characters are not allowed in header values.
fn header_value(text: &str) -> HeaderValue {
    let clean: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    HeaderValue::from_str(&clean).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
}

/// Renders a decision as response headers.
///
/// Successes carry the backend, rejections carry the wait.
#[must_use]
pub fn render_response(response: &Response) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(AUTH_STATUS, header_value(&response.status));
    if response.is_ok() {
        headers.insert(AUTH_SERVER, header_value(&response.server));
        headers.insert(AUTH_PORT, HeaderValue::from(response.port));
    } else {
        headers.insert(AUTH_WAIT, HeaderValue::from(response.wait));
    }
    headers
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
    fn test_parse_request() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_METHOD, HeaderValue::from_static("LOGIN"));
        headers.insert(AUTH_USER, HeaderValue::from_static("bob@example.com"));
        headers.insert(AUTH_PASS, HeaderValue::from_static("p%40ss"));
        headers.insert(AUTH_PROTOCOL, HeaderValue::from_static("imap"));
        headers.insert(CLIENT_IP, HeaderValue::from_static("192.0.2.7"));

        let request = parse_request(&headers);

        assert_eq!(request.method, Method::Plain);
        assert_eq!(request.user, "bob@example.com");
        // Passed through verbatim.
        assert_eq!(request.password(), "p%40ss");
        assert_eq!(request.protocol, Protocol::Imap);
        assert_eq!(request.client_ip, "192.0.2.7");
    }

    #[test]
    fn test_escaped_credentials_are_not_decoded() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_USER, HeaderValue::from_static("bob%20smith"));
        headers.insert(AUTH_PASS, HeaderValue::from_static("100%25%2Bsure"));

        let request = parse_request(&headers);

        assert_eq!(request.user, "bob%20smith");
        assert_eq!(request.password(), "100%25%2Bsure");
    }

    #[test]
    fn test_missing_headers_are_empty() {
        let request = parse_request(&HeaderMap::new());

        assert_eq!(request.method, Method::Other);
        assert_eq!(request.user, "");
        assert_eq!(request.protocol, Protocol::Other);
        assert_eq!(request.client_ip, "");
    }

    #[test]
    fn test_render_success() {
        let headers = render_response(&Response {
            server: "10.1.1.1".to_string(),
            port: 143,
            ..Response::ok()
        });

        assert_eq!(headers[&AUTH_STATUS], "OK");
        assert_eq!(headers[&AUTH_SERVER], "10.1.1.1");
        assert_eq!(headers[&AUTH_PORT], "143");
        assert!(headers.get(&AUTH_WAIT).is_none());
    }

    #[test]
    fn test_render_rejection() {
        let headers = render_response(&Response {
            wait: 4,
            ..Response::reject("Invalid username or password")
        });

        assert_eq!(headers[&AUTH_STATUS], "Invalid username or password");
        assert_eq!(headers[&AUTH_WAIT], "4");
        assert!(headers.get(&AUTH_SERVER).is_none());
        assert!(headers.get(&AUTH_PORT).is_none());
    }

    #[test]
    fn test_render_strips_control_characters() {
        let headers = render_response(&Response::reject("Server returned NO: bad\r\nX-Evil: 1"));

        assert_eq!(headers[&AUTH_STATUS], "Server returned NO: bad  X-Evil: 1");
    }
}
