//! # mailgate-core
//!
//! The authentication decision chain behind a mail proxy's `auth_http`
//! endpoint. A chain is a tree of small [`AuthHandler`] stages: decorators
//! that wrap one downstream stage, a fan-out that tries several, and
//! terminal verifiers that talk to a real backend.
//!
//! ## Stages
//!
//! | Stage | Kind | Effect |
//! |-------|------|--------|
//! | [`Throttle`] | decorator | exponential backoff per client address |
//! | [`MethodGate`] | decorator | rejects unsupported auth mechanisms |
//! | [`EndpointSelect`] | decorator | attaches backend host/port on success |
//! | [`MailboxProbe`] | decorator | rejects unknown mailboxes early |
//! | [`AnyOf`] | fan-out | first success among alternatives |
//! | [`ImapLogin`] | terminal | LOGIN against one backend |
//!
//! ## Example
//!
//! ```ignore
//! use mailgate_core::{AnyOf, Broker, DelayCacheFactory, Endpoint, Endpoints, ImapLogin,
//!     Method, MethodGate, Protocol, Security, Throttle, ThrottlePolicy};
//!
//! let caches = DelayCacheFactory::new();
//! let backend = Endpoint::new("mx1.internal", 993, Security::Implicit);
//! let chain = Throttle::new(
//!     ThrottlePolicy::new(2, 16)?,
//!     &caches,
//!     MethodGate::new([Method::Plain], AnyOf::new(vec![Box::new(ImapLogin::new(backend))]))?,
//! );
//! let broker = Broker::new(chain);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod broker;
pub mod directory;
mod endpoint;
mod error;
mod handler;
mod request;
pub mod stage;
pub mod topology;

pub use broker::Broker;
pub use directory::{HttpDirectory, Lookup, MailboxDirectory};
pub use endpoint::{Endpoint, Endpoints};
pub use error::{DirectoryError, TopologyError};
pub use handler::{AuthHandler, BoxedHandler};
pub use mailgate_imap::Security;
pub use request::{AUTH_STATUS_OK, Method, Protocol, Request, Response};
pub use stage::{
    AnyOf, DelayCache, DelayCacheFactory, EndpointSelect, ImapLogin, MailboxProbe, MethodGate,
    Throttle, ThrottlePolicy,
};
pub use topology::{Assembler, StageConfig};
