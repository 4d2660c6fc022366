//! `HttpDirectory` against an in-process directory service.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::time::Duration;

use axum::Router;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use tokio::net::TcpListener;

use mailgate_core::{DirectoryError, HttpDirectory, Lookup, MailboxDirectory};

/// Knows `bob@example.com`; answers 503 for the `broken.example` domain.
async fn check(Query(params): Query<HashMap<String, String>>) -> StatusCode {
    let mailbox = params.get("mailbox").map(String::as_str);
    let domain = params.get("domain").map(String::as_str);
    match (mailbox, domain) {
        (Some("bob"), Some("example.com")) => StatusCode::OK,
        (_, Some("broken.example")) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::NOT_FOUND,
    }
}

async fn spawn_directory() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/check", get(check));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}/check")
}

#[tokio::test]
async fn test_found() {
    let directory = HttpDirectory::new(&spawn_directory().await, Duration::from_secs(2)).unwrap();

    let lookup = directory.lookup("bob", "example.com").await.unwrap();

    assert_eq!(lookup, Lookup::Found);
}

#[tokio::test]
async fn test_not_found() {
    let directory = HttpDirectory::new(&spawn_directory().await, Duration::from_secs(2)).unwrap();

    let lookup = directory.lookup("alice", "example.com").await.unwrap();

    assert_eq!(lookup, Lookup::NotFound);
}

#[tokio::test]
async fn test_unexpected_status() {
    let directory = HttpDirectory::new(&spawn_directory().await, Duration::from_secs(2)).unwrap();

    let lookup = directory.lookup("bob", "broken.example").await.unwrap();

    assert_eq!(lookup, Lookup::Unexpected("503 Service Unavailable".to_string()));
}

#[tokio::test]
async fn test_unreachable_directory_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let directory =
        HttpDirectory::new(&format!("http://{addr}/check"), Duration::from_secs(2)).unwrap();

    let result = directory.lookup("bob", "example.com").await;

    assert!(matches!(result, Err(DirectoryError::Http(_))));
}
