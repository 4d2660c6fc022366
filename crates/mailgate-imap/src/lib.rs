//! # mailgate-imap
//!
//! A deliberately small IMAP client whose only job is to answer one
//! question: does this backend accept this username and password?
//!
//! ## Features
//!
//! - **Three security modes**: implicit TLS, STARTTLS upgrade, or plaintext,
//!   selected by a single [`Security`] value
//! - **TLS via rustls**: no OpenSSL dependency
//! - **Bounded**: connect and per-command timeouts, so a dead backend fails
//!   the verification instead of stalling the caller
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailgate_imap::{Config, Security};
//!
//! #[tokio::main]
//! async fn main() -> mailgate_imap::Result<()> {
//!     let config = Config::builder("imap.example.com")
//!         .security(Security::StartTls)
//!         .build();
//!
//!     mailgate_imap::verify_login(&config, "user@example.com", "password").await?;
//!     println!("credentials accepted");
//!     Ok(())
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! ┌─────────────────────┐
//! │   NotAuthenticated  │ ─── starttls() ───→ NotAuthenticated (TLS)
//! └─────────────────────┘
//!            │
//!         login()
//!            ▼
//! ┌─────────────────────┐
//! │    Authenticated    │ ─── logout()
//! └─────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod response;

pub use command::{Command, TagGenerator};
pub use connection::{
    Authenticated, Client, Config, ConfigBuilder, FramedStream, ImapStream, NotAuthenticated,
    Security, connect, verify_login,
};
pub use error::{Error, Result};
pub use response::{Response, Status};
