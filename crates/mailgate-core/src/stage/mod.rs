//! Chain stages.

mod any_of;
mod endpoint_select;
mod imap_login;
mod mailbox_probe;
mod method_gate;
mod throttle;

pub use any_of::AnyOf;
pub use endpoint_select::EndpointSelect;
pub use imap_login::ImapLogin;
pub use mailbox_probe::MailboxProbe;
pub use method_gate::MethodGate;
pub use throttle::{DELAY_TTL, DelayCache, DelayCacheFactory, Throttle, ThrottlePolicy};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::handler::AuthHandler;
    use crate::request::{Request, Response};

    /// Accepts exactly one password.
    pub struct PasswordCheck {
        password: String,
        calls: AtomicUsize,
    }

    impl PasswordCheck {
        pub fn new(password: &str) -> Self {
            Self {
                password: password.to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthHandler for PasswordCheck {
        async fn authenticate(&self, request: &Request) -> Response {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.password() == self.password {
                Response::ok()
            } else {
                Response::reject("Invalid login or password")
            }
        }
    }

    /// Returns a fixed response and records the users it saw.
    pub struct Fixed {
        response: Response,
        seen: Mutex<Vec<String>>,
    }

    impl Fixed {
        pub fn new(response: Response) -> Self {
            Self {
                response,
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn seen(&self) -> Vec<String> {
            self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl AuthHandler for Fixed {
        async fn authenticate(&self, request: &Request) -> Response {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request.user.clone());
            }
            self.response.clone()
        }
    }
}
