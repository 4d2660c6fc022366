//! A chain assembled from TOML, run against a directory service and two
//! scripted IMAP backends on loopback.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;

use axum::Router;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use mailgate_core::{Assembler, Broker, Method, Protocol, Request, StageConfig};

/// IMAP backend accepting one password, serving any number of sessions.
async fn imap_backend(password: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut lines = BufReader::new(read).lines();

                write.write_all(b"* OK ready\r\n").await.unwrap();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut parts = line.splitn(3, ' ');
                    let tag = parts.next().unwrap_or_default().to_string();
                    let command = parts.next().unwrap_or_default().to_ascii_uppercase();
                    let reply = match command.as_str() {
                        "LOGIN" if line.ends_with(password) => format!("{tag} OK logged in\r\n"),
                        "LOGIN" => format!("{tag} NO bad credentials\r\n"),
                        "LOGOUT" => format!("* BYE\r\n{tag} OK bye\r\n"),
                        _ => format!("{tag} BAD\r\n"),
                    };
                    if write.write_all(reply.as_bytes()).await.is_err() || command == "LOGOUT" {
                        break;
                    }
                }
            });
        }
    });

    port
}

/// Directory that knows exactly `bob@example.com`.
async fn directory() -> String {
    async fn check(Query(params): Query<HashMap<String, String>>) -> StatusCode {
        if params.get("mailbox").map(String::as_str) == Some("bob")
            && params.get("domain").map(String::as_str) == Some("example.com")
        {
            StatusCode::OK
        } else {
            StatusCode::NOT_FOUND
        }
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new().route("/check", get(check)))
            .await
            .unwrap();
    });
    format!("http://{addr}/check")
}

async fn broker() -> Broker {
    let mx1 = imap_backend("bad1").await;
    let mx2 = imap_backend("s2").await;
    let directory = directory().await;

    let config: StageConfig = toml::from_str(&format!(
        r#"
        kind = "throttle"
        base_delay = 2
        max_delay = 16

        [next]
        kind = "method_gate"
        allowed = ["plain"]

        [next.next]
        kind = "endpoint_select"
        endpoints = [{{ protocol = "imap", host = "imap.internal", port = 143, security = "none" }}]

        [next.next.next]
        kind = "mailbox_probe"
        base_url = "{directory}"
        timeout_secs = 2

        [next.next.next.next]
        kind = "any_of"
        stages = [
          {{ kind = "imap_login", host = "127.0.0.1", port = {mx1}, security = "none", connect_timeout_secs = 2, io_timeout_secs = 2 }},
          {{ kind = "imap_login", host = "127.0.0.1", port = {mx2}, security = "none", connect_timeout_secs = 2, io_timeout_secs = 2 }},
        ]
        "#
    ))
    .unwrap();

    Broker::from_boxed(Assembler::new().build(&config).unwrap())
}

fn req(user: &str, pass: &str, protocol: Protocol, ip: &str) -> Request {
    Request::new(Method::Plain, user, pass, protocol, ip)
}

#[tokio::test]
async fn test_second_backend_accepts() {
    let broker = broker().await;

    let response = broker
        .authenticate(&req("bob@example.com", "s2", Protocol::Imap, "10.0.0.1"))
        .await;

    assert!(response.is_ok(), "status: {}", response.status);
    assert_eq!(response.server, "imap.internal");
    assert_eq!(response.port, 143);
    assert_eq!(response.wait, 0);
}

#[tokio::test]
async fn test_first_backend_accepts() {
    let broker = broker().await;

    let response = broker
        .authenticate(&req("bob@example.com", "bad1", Protocol::Imap, "10.0.0.1"))
        .await;

    assert!(response.is_ok());
}

#[tokio::test]
async fn test_wrong_password_everywhere_backs_off() {
    let broker = broker().await;
    let request = req("bob@example.com", "zzz", Protocol::Imap, "10.0.0.2");

    let mut waits = Vec::new();
    for _ in 0..5 {
        let response = broker.authenticate(&request).await;
        assert_eq!(response.status, "Invalid username or password");
        waits.push(response.wait);
    }

    assert_eq!(waits, vec![2, 4, 8, 16, 16]);
}

#[tokio::test]
async fn test_unknown_mailbox_rejected_before_login() {
    let broker = broker().await;

    let response = broker
        .authenticate(&req("alice@example.com", "s2", Protocol::Imap, "10.0.0.3"))
        .await;

    assert_eq!(response.status, "unknown user: alice@example.com");
    assert_eq!(response.wait, 2);
}

#[tokio::test]
async fn test_valid_credential_for_unrouted_protocol() {
    let broker = broker().await;

    let response = broker
        .authenticate(&req("bob@example.com", "s2", Protocol::Pop3, "10.0.0.4"))
        .await;

    assert_eq!(response.status, "Unsupported protocol: pop3");
    assert_eq!(response.server, "");
}
