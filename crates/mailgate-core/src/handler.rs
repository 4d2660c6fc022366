//! The capability every chain stage implements.

use std::sync::Arc;

use async_trait::async_trait;

use crate::request::{Request, Response};

/// One stage of the authentication decision chain.
///
/// A stage either renders a verdict itself or delegates to the stage(s) it
/// owns. Downstream stages are fixed at construction: decorators take their
/// `next` stage in `new`, terminal verifiers take none, so a terminal stage
/// cannot be given a successor.
///
/// Implementations must not let errors escape: every failure of a
/// collaborator the stage owns is converted into a rejecting [`Response`].
#[async_trait]
pub trait AuthHandler: Send + Sync {
    /// Decides on one authentication attempt.
    async fn authenticate(&self, request: &Request) -> Response;
}

/// An owned, type-erased stage.
pub type BoxedHandler = Box<dyn AuthHandler>;

#[async_trait]
impl<H: AuthHandler + ?Sized> AuthHandler for Box<H> {
    async fn authenticate(&self, request: &Request) -> Response {
        (**self).authenticate(request).await
    }
}

#[async_trait]
impl<H: AuthHandler + ?Sized> AuthHandler for Arc<H> {
    async fn authenticate(&self, request: &Request) -> Response {
        (**self).authenticate(request).await
    }
}
