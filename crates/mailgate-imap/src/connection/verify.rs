//! One-shot credential verification.

use tracing::{debug, warn};

use super::config::Config;
use super::stream::connect;
use crate::Result;

/// Connects to the backend described by `config`, logs in, and logs out.
///
/// Returns `Ok(())` only if the server accepted the LOGIN. The connect phase
/// is bounded by `connect_timeout` and each command by `io_timeout`. A failed
/// LOGOUT after a successful LOGIN does not change the verdict.
///
/// # Errors
///
/// Any connection, TLS, protocol, timeout or credential failure.
pub async fn verify_login(config: &Config, username: &str, password: &str) -> Result<()> {
    let client = connect(config).await?.with_io_timeout(config.io_timeout);
    let client = client.login(username, password).await?;

    debug!(address = %config.address(), "backend accepted credentials");

    if let Err(e) = client.logout().await {
        warn!(address = %config.address(), error = %e, "LOGOUT after successful LOGIN failed");
    }

    Ok(())
}
