//! Startup connection gating.
//!
//! The broker may come up after the services that depend on it. Rather than
//! relying on orchestration order, connecting retries immediately (no
//! backoff) until it succeeds or a deadline passes. This is a one-time
//! startup gate; once connected, failures are not retried here.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Connector};
use crate::error::{QueueError, QueueResult};

/// Connect and declare `queues`, retrying connection-level failures until
/// `deadline` has elapsed.
///
/// Errors that are not connection-level (for example a rejected queue
/// declaration) are returned immediately. Past the deadline the result is
/// [`QueueError::ConnectDeadlineExceeded`], which callers treat as fatal.
pub async fn connect_with_deadline<C: Connector>(
    connector: &C,
    queues: &[&str],
    deadline: Duration,
) -> QueueResult<C::Broker> {
    let started = Instant::now();
    let give_up_at = started + deadline;
    let mut attempts = 0u64;
    let mut failures = FailureTracker::new(3);

    loop {
        let now = Instant::now();
        if now >= give_up_at {
            error!(
                attempts,
                waited = ?started.elapsed(),
                "Broker unreachable, giving up"
            );
            return Err(QueueError::ConnectDeadlineExceeded {
                waited: started.elapsed(),
                attempts,
            });
        }

        attempts += 1;
        match tokio::time::timeout(give_up_at - now, attempt(connector, queues)).await {
            Ok(Ok(broker)) => {
                info!(attempts, waited = ?started.elapsed(), "Connected to broker");
                return Ok(broker);
            }
            Ok(Err(e)) if e.is_connection_error() => {
                if failures.record_failure() {
                    debug!(attempt = attempts, "Broker connection attempt failed: {}", e);
                }
            }
            Ok(Err(e)) => return Err(e),
            // Attempt outlived the deadline; reported at the top of the loop.
            Err(_) => {}
        }

        tokio::task::yield_now().await;
    }
}

async fn attempt<C: Connector>(connector: &C, queues: &[&str]) -> QueueResult<C::Broker> {
    let mut broker = connector.connect().await?;
    for queue in queues {
        broker.declare_queue(queue).await?;
    }
    Ok(broker)
}

/// Suppresses log spam while an operation keeps failing.
#[derive(Debug, Default)]
struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
}

impl FailureTracker {
    fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
        }
    }

    /// Returns `true` if this failure should be logged.
    fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else {
            if self.consecutive_failures == self.max_logged_failures + 1 {
                warn!(
                    "Suppressing further connection failure logs after {} consecutive failures",
                    self.max_logged_failures
                );
            }
            false
        }
    }
}
