//! Staged wait for an external "ready" condition.
//!
//! The probe is checked immediately, again after a short delay, then on the
//! earlier of a retry delay or a notification, and finally on every
//! notification until the overall timeout runs out.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("not ready after {waited:?}")]
    TimedOut { waited: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    pub first_delay: Duration,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            first_delay: Duration::from_millis(100),
            retry_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Waits until `probe` returns true. Signal `notify` with `notify_one` so a
/// notification sent before the waiter arrives is not lost.
pub async fn wait_until_ready<P>(probe: P, notify: &Notify, policy: ReadinessPolicy) -> Result<(), ReadinessError>
where
    P: Fn() -> bool,
{
    let deadline = Instant::now() + policy.timeout;
    if probe() {
        return Ok(());
    }

    sleep(policy.first_delay).await;
    if probe() {
        debug!("ready after first delay");
        return Ok(());
    }

    tokio::select! {
        _ = sleep(policy.retry_delay) => {}
        _ = notify.notified() => {}
    }
    if probe() {
        debug!("ready after retry");
        return Ok(());
    }

    loop {
        match timeout_at(deadline, notify.notified()).await {
            Ok(()) if probe() => return Ok(()),
            Ok(()) => continue,
            Err(_) => {
                return Err(ReadinessError::TimedOut {
                    waited: policy.timeout,
                })
            }
        }
    }
}
