//! The batching loop: notification intake, size/time flush, reconnect,
//! startup drain, and shutdown — spec.md §4.5.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mailroom_crypto::MacSigner;
use mailroom_database::{DatabaseError, DbHandle, DequeueOutcome};
use tracing::warn;

use crate::clock::{BatchClock, FlushDecision};
use crate::error::BatcherError;

/// How long to wait between unbounded reconnect attempts once the agent
/// is past its initial (non-retried) startup connect.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Static configuration for one run of the batching loop.
pub struct BatcherConfig {
    pub conn_info: String,
    pub channel: String,
    pub queue_name: String,
    pub batch_limit: u32,
    pub batch_timeout: Duration,
    pub healthcheck_interval: Duration,
}

/// Why `run` returned successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// `shutdown` was observed set at an observation point.
    Shutdown,
}

/// Result of one connect-and-drain attempt, preserving the
/// transient/terminal tag from spec.md §9's design note so the caller can
/// tell "retry forever" apart from "exit now" without re-guessing at the
/// classification from the error value alone.
enum ConnectOutcome {
    Ready(DbHandle),
    Transient(DatabaseError),
    Terminal(DatabaseError),
}

/// Opens a fresh connection, subscribes, prepares the dequeue statement,
/// and runs the startup drain (repeated `batch_limit`-sized dequeues until
/// a short result confirms the backlog is cleared). Per the Open Question
/// resolution in DESIGN.md, the full unconditional drain runs after every
/// connect, not just the first one.
///
/// `DbHandle::connect` itself fails only terminally (spec.md §4.4: "Fails
/// terminally if any step fails"); only the drain's dequeue calls can come
/// back transient.
async fn connect_and_drain(
    config: &BatcherConfig,
    signer: &MacSigner,
    shutdown: &AtomicBool,
    out: &mut impl Write,
) -> ConnectOutcome {
    let mut handle = match DbHandle::connect(&config.conn_info, &config.channel).await {
        Ok(h) => h,
        Err(e) => return ConnectOutcome::Terminal(e),
    };

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match handle
            .dequeue(signer, &config.queue_name, config.batch_limit as i64, out)
            .await
        {
            DequeueOutcome::Rows(n) => {
                if (n as u32) < config.batch_limit {
                    break;
                }
            }
            DequeueOutcome::Transient(err) => return ConnectOutcome::Transient(err),
            DequeueOutcome::Terminal(err) => return ConnectOutcome::Terminal(err),
        }
    }

    ConnectOutcome::Ready(handle)
}

enum ReconnectOutcome {
    Ready(DbHandle),
    ShutdownRequested,
    Terminal(DatabaseError),
}

/// Retries `connect_and_drain` with a fixed backoff, unbounded while
/// `shutdown` stays clear — spec.md §7: "No bounded retry count at
/// runtime — the agent reconnects indefinitely while running."
async fn reconnect_until_ready(
    config: &BatcherConfig,
    signer: &MacSigner,
    shutdown: &AtomicBool,
    out: &mut impl Write,
) -> ReconnectOutcome {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return ReconnectOutcome::ShutdownRequested;
        }

        match connect_and_drain(config, signer, shutdown, out).await {
            ConnectOutcome::Ready(handle) => return ReconnectOutcome::Ready(handle),
            ConnectOutcome::Terminal(err) => return ReconnectOutcome::Terminal(err),
            ConnectOutcome::Transient(err) => {
                warn!(error = %err, "reconnect attempt failed, retrying");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}

/// Runs the batching loop until `shutdown` is observed set or a terminal
/// failure occurs.
///
/// `shutdown` is written by a signal handler elsewhere (spec.md §9 models
/// it as "an atomic small integer"); this loop only ever reads it, at the
/// observation points spec.md §5 names: after the socket wait, after
/// notification draining, and inside the startup-drain loop.
pub async fn run(
    config: &BatcherConfig,
    signer: &MacSigner,
    shutdown: &AtomicBool,
    mut out: impl Write,
) -> Result<ExitReason, BatcherError> {
    let mut handle = match connect_and_drain(config, signer, shutdown, &mut out).await {
        ConnectOutcome::Ready(h) => h,
        ConnectOutcome::Transient(e) | ConnectOutcome::Terminal(e) => {
            return Err(BatcherError::Startup(e))
        }
    };
    if shutdown.load(Ordering::SeqCst) {
        handle.close().await;
        return Ok(ExitReason::Shutdown);
    }

    let mut last_activity = Instant::now();

    loop {
        let mut clock = BatchClock::new(Instant::now());

        // Runs until a transient failure is observed (requiring a
        // reconnect) or the function returns outright (shutdown, or a
        // terminal failure).
        loop {
            if shutdown.load(Ordering::SeqCst) {
                handle.close().await;
                return Ok(ExitReason::Shutdown);
            }

            match clock.decide(Instant::now(), config.batch_limit, config.batch_timeout) {
                FlushDecision::Flush { limit } => {
                    match handle
                        .dequeue(signer, &config.queue_name, limit as i64, &mut out)
                        .await
                    {
                        DequeueOutcome::Rows(_) => {
                            let now = Instant::now();
                            clock.reset(now);
                            last_activity = now;
                        }
                        DequeueOutcome::Transient(err) => {
                            warn!(error = %err, "transient dequeue error, reconnecting");
                            break;
                        }
                        DequeueOutcome::Terminal(err) => {
                            handle.close().await;
                            return Err(BatcherError::Terminal(err));
                        }
                    }
                }
                FlushDecision::Wait { remaining } => {
                    tokio::select! {
                        notification = handle.recv_notification() => {
                            match notification {
                                Some(()) => {
                                    let (extra, connection_lost) = handle.drain_notifications();
                                    clock.record_notifications(1 + extra as u32, Instant::now());
                                    if connection_lost {
                                        warn!("connection lost while draining notifications");
                                        break;
                                    }
                                }
                                None => {
                                    warn!("notification channel closed, reconnecting");
                                    break;
                                }
                            }
                        }
                        _ = tokio::time::sleep(remaining) => {
                            let now = Instant::now();
                            clock.on_timeout_expiry(now);
                            if clock.counter() == 0
                                && now.saturating_duration_since(last_activity) >= config.healthcheck_interval
                            {
                                if handle.healthcheck().await {
                                    last_activity = Instant::now();
                                } else {
                                    warn!("healthcheck failed, reconnecting");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }

        handle.close().await;
        match reconnect_until_ready(config, signer, shutdown, &mut out).await {
            ReconnectOutcome::Ready(h) => {
                handle = h;
                last_activity = Instant::now();
            }
            ReconnectOutcome::ShutdownRequested => return Ok(ExitReason::Shutdown),
            ReconnectOutcome::Terminal(err) => return Err(BatcherError::Terminal(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_positive() {
        assert!(RECONNECT_BACKOFF > Duration::ZERO);
    }
}
