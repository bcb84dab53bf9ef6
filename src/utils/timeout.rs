//! Default durations and bounded waits.
//!
//! Every blocking acknowledgment wait in the crate goes through
//! [`bounded`], so timeout behavior is uniform across bindings.

use crate::error::{ConnectorError, Result};
use std::future::Future;
use std::time::Duration;

/// Default timeout for individual send/receive actions.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default timeout for connection handshakes.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default keep-alive interval for connection heartbeats.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_millis(2000);

/// Default interval for polling bindings.
pub const DEFAULT_NOTIFICATION_INTERVAL: Duration = Duration::from_millis(1000);

/// Delay before a binding's I/O task retries after a transient error.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Awaits `future` for at most `limit`, mapping expiry to
/// [`ConnectorError::Timeout`].
pub async fn bounded<F, T>(limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| ConnectorError::Timeout(limit))
}
