//! IMAP connection management.
//!
//! This module provides:
//! - Configuration (host, port, security mode, timeouts)
//! - TLS/plaintext stream abstraction and the dial policy
//! - Line framing
//! - Type-state client covering greeting, STARTTLS, LOGIN and LOGOUT
//! - [`verify_login`], the one-shot credential check

mod client;
mod config;
mod framed;
mod stream;
mod verify;

pub use client::{Authenticated, Client, NotAuthenticated};
pub use config::{Config, ConfigBuilder, Security};
pub use framed::FramedStream;
pub use stream::{ImapStream, connect, tls_connector};
pub use verify::verify_login;
