//! The HTTP bridge end to end: proxy-style header requests against a
//! served broker.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use mailgate::config::Config;
use mailgate::server;

/// IMAP backend that accepts only `password`.
async fn imap_backend(password: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut lines = BufReader::new(read).lines();

                if write.write_all(b"* OK ready\r\n").await.is_err() {
                    return;
                }
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut parts = line.splitn(3, ' ');
                    let tag = parts.next().unwrap_or_default().to_string();
                    let command = parts.next().unwrap_or_default().to_ascii_uppercase();
                    let reply = match command.as_str() {
                        "LOGIN" if line.ends_with(password) => format!("{tag} OK\r\n"),
                        "LOGIN" => format!("{tag} NO denied\r\n"),
                        "LOGOUT" => format!("* BYE\r\n{tag} OK\r\n"),
                        _ => format!("{tag} BAD\r\n"),
                    };
                    if write.write_all(reply.as_bytes()).await.is_err() || command == "LOGOUT" {
                        return;
                    }
                }
            });
        }
    });

    port
}

/// Serves `config` on an ephemeral port and returns its base URL.
async fn serve(config: &Config) -> String {
    let broker = Arc::new(config.broker().unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        server::serve(listener, broker, std::future::pending())
            .await
            .unwrap();
    });

    format!("http://{addr}/auth")
}

async fn configured() -> String {
    let port = imap_backend("s2").await;
    let config = Config::parse(&format!(
        r#"
        [chain]
        kind = "throttle"
        base_delay = 2
        max_delay = 16

        [chain.next]
        kind = "method_gate"
        allowed = ["plain"]

        [chain.next.next]
        kind = "endpoint_select"
        endpoints = [{{ protocol = "imap", host = "imap.internal", port = 143, security = "none" }}]

        [chain.next.next.next]
        kind = "any_of"
        stages = [{{ kind = "imap_login", host = "127.0.0.1", port = {port}, security = "none" }}]
        "#
    ))
    .unwrap();
    serve(&config).await
}

async fn ask(url: &str, method: &str, pass: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(url)
        .header("Auth-Method", method)
        .header("Auth-User", "bob@example.com")
        .header("Auth-Pass", pass)
        .header("Auth-Protocol", "imap")
        .header("Client-IP", "198.51.100.4")
        .send()
        .await
        .unwrap()
}

fn header<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).map(|v| v.to_str().unwrap())
}

#[tokio::test]
async fn test_success_is_routed() {
    let url = configured().await;

    let response = ask(&url, "plain", "s2").await;

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(header(&response, "Auth-Status"), Some("OK"));
    assert_eq!(header(&response, "Auth-Server"), Some("imap.internal"));
    assert_eq!(header(&response, "Auth-Port"), Some("143"));
    assert_eq!(header(&response, "Auth-Wait"), None);
    assert!(response.text().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failures_report_growing_wait() {
    let url = configured().await;

    let first = ask(&url, "plain", "wrong").await;
    assert_eq!(header(&first, "Auth-Status"), Some("Invalid username or password"));
    assert_eq!(header(&first, "Auth-Wait"), Some("2"));
    assert_eq!(header(&first, "Auth-Server"), None);

    let second = ask(&url, "cram-md5", "s2").await;
    assert_eq!(
        header(&second, "Auth-Status"),
        Some("Authentication method not supported")
    );
    assert_eq!(header(&second, "Auth-Wait"), Some("4"));

    // Success resets the client.
    ask(&url, "login", "s2").await;
    let third = ask(&url, "plain", "wrong").await;
    assert_eq!(header(&third, "Auth-Wait"), Some("2"));
}

#[tokio::test]
async fn test_default_chain_rejects_everything() {
    let url = serve(&Config::default()).await;

    let response = ask(&url, "plain", "anything").await;

    assert_eq!(
        header(&response, "Auth-Status"),
        Some("Invalid username or password")
    );
    assert_eq!(header(&response, "Auth-Wait"), Some("2"));
}
