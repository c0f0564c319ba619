//! Background refresh scheduler.
//!
//! Runs a caller-supplied refresh cycle immediately on spawn and then on a
//! fixed interval. Cycles are awaited inline, so two can never run at
//! once; interval ticks that fall due while a cycle is still running are
//! skipped rather than queued. The task stops when asked to shut down or
//! when every [`PollerHandle`] has been dropped.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

// ── Public types ────────────────────────────────────────────────────────────

/// Commands sent from consumers to the poller task.
#[derive(Debug)]
enum PollCmd {
    /// Run a refresh cycle now, outside the regular schedule.
    Refresh,
    Shutdown,
}

/// Handle for steering a running poller task.
///
/// The task exits once every handle is gone, so polling never outlives
/// its last consumer.
#[derive(Clone)]
pub struct PollerHandle {
    cmd_tx: tokio::sync::mpsc::UnboundedSender<PollCmd>,
}

impl PollerHandle {
    /// Request an immediate refresh cycle.
    pub fn trigger(&self) {
        let _ = self.cmd_tx.send(PollCmd::Refresh);
    }

    /// Stop the poller task.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(PollCmd::Shutdown);
    }
}

// ── Spawn ───────────────────────────────────────────────────────────────────

/// Spawn the poller on the current tokio runtime.
///
/// `cycle` is invoked once per scheduled tick and once per
/// [`PollerHandle::trigger`] call; the first invocation happens
/// immediately.
pub fn spawn_poller<F, Fut>(interval: Duration, cycle: F) -> PollerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(poller_main(interval, cmd_rx, cycle));
    PollerHandle { cmd_tx }
}

/// Main loop of the poller task.
async fn poller_main<F, Fut>(
    interval: Duration,
    mut cmd_rx: tokio::sync::mpsc::UnboundedReceiver<PollCmd>,
    mut cycle: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    log::info!("poller: started with interval {interval:?}");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                log::debug!("poller: scheduled refresh");
                cycle().await;
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(PollCmd::Refresh) => {
                    log::debug!("poller: manual refresh");
                    cycle().await;
                }
                Some(PollCmd::Shutdown) => {
                    log::info!("poller: shutting down");
                    return;
                }
                None => {
                    log::info!("poller: all handles dropped, shutting down");
                    return;
                }
            },
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
