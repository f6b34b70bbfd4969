use crate::connection::Connection;
use crate::sse::HEARTBEAT_FRAME;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Writes keep-alive comment frames on a fixed period until stopped.
///
/// The first frame goes out one full interval after start. Write failures end
/// the task quietly; a lost heartbeat never fails the request.
pub struct Heartbeat {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Starts ticking. Cancelling `cancel` (or any parent of it) stops the task
    /// from outside without access to the handle.
    pub fn start(conn: Connection, interval: Duration, cancel: CancellationToken) -> Self {
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let written = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    res = conn.write(HEARTBEAT_FRAME) => res,
                };
                if written.is_err() {
                    tracing::trace!("heartbeat write failed, connection gone");
                    break;
                }
            }
        });
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Cancels the task and waits for it to exit, so no heartbeat can be
    /// written after this returns. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Stops the keeper behind `handle`, if any, and clears it.
pub async fn stop(handle: &mut Option<Heartbeat>) {
    if let Some(mut heartbeat) = handle.take() {
        heartbeat.stop().await;
    }
}
