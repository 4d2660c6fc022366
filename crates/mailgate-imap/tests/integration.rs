//! Integration tests for the login check.
//!
//! Each test runs a scripted IMAP server on a loopback port and drives
//! `verify_login` against it over a real TCP connection.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use mailgate_imap::{Config, Error, Security, verify_login};

/// One scripted exchange: the line the client must send (without tag
/// checking beyond the prefix) and the lines the server replies with.
struct Step {
    expect: &'static str,
    reply: &'static [&'static str],
}

/// Spawns a server that greets, then plays `steps` in order.
///
/// The handle resolves to the lines the client actually sent.
async fn scripted_server(
    greeting: &'static str,
    steps: Vec<Step>,
) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        let mut received = Vec::new();

        write.write_all(greeting.as_bytes()).await.unwrap();

        for step in steps {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            assert!(
                line.contains(step.expect),
                "expected {:?} in {line:?}",
                step.expect
            );
            received.push(line);
            for reply in step.reply {
                write.write_all(reply.as_bytes()).await.unwrap();
            }
        }

        received
    });

    (port, handle)
}

fn plain_config(port: u16) -> Config {
    Config::builder("127.0.0.1")
        .port(port)
        .security(Security::None)
        .connect_timeout(Duration::from_secs(2))
        .io_timeout(Duration::from_secs(2))
        .build()
}

#[tokio::test]
async fn test_valid_credentials() {
    let (port, server) = scripted_server(
        "* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready\r\n",
        vec![
            Step {
                expect: "LOGIN bob@example.com secret",
                reply: &["A0001 OK Logged in\r\n"],
            },
            Step {
                expect: "LOGOUT",
                reply: &["* BYE bye\r\n", "A0002 OK done\r\n"],
            },
        ],
    )
    .await;

    verify_login(&plain_config(port), "bob@example.com", "secret")
        .await
        .unwrap();

    let received = server.await.unwrap();
    assert_eq!(received.len(), 2);
    assert!(received[0].starts_with("A0001 "));
}

#[tokio::test]
async fn test_invalid_credentials() {
    let (port, _server) = scripted_server(
        "* OK ready\r\n",
        vec![Step {
            expect: "LOGIN",
            reply: &["A0001 NO [AUTHENTICATIONFAILED] Authentication failed.\r\n"],
        }],
    )
    .await;

    let err = verify_login(&plain_config(port), "bob", "wrong")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::No(_)));
    assert!(err.to_string().contains("Authentication failed."));
}

#[tokio::test]
async fn test_logout_failure_keeps_verdict() {
    let (port, _server) = scripted_server(
        "* OK ready\r\n",
        vec![Step {
            expect: "LOGIN",
            reply: &["A0001 OK Logged in\r\n"],
        }],
    )
    .await;

    // The server hangs up instead of answering LOGOUT.
    verify_login(&plain_config(port), "bob", "secret")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_starttls_refused() {
    let (port, _server) = scripted_server(
        "* OK [CAPABILITY IMAP4rev1 STARTTLS LOGINDISABLED] ready\r\n",
        vec![Step {
            expect: "STARTTLS",
            reply: &["A0001 NO TLS not available\r\n"],
        }],
    )
    .await;

    let config = Config::builder("127.0.0.1")
        .port(port)
        .security(Security::StartTls)
        .build();

    let err = verify_login(&config, "bob", "secret").await.unwrap_err();
    assert!(matches!(err, Error::No(text) if text == "TLS not available"));
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _server = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let config = Config::builder("127.0.0.1")
        .port(port)
        .security(Security::None)
        .connect_timeout(Duration::from_millis(200))
        .build();

    let err = verify_login(&config, "bob", "secret").await.unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(200)));
}
