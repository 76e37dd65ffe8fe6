//! Wait controller
//!
//! Bounded, cancellable sleeping. [`WaitController::wait`] is the only place an attempt
//! yields for an extended period. Each tick sleeps at most one poll interval while
//! racing the task's abort token and the shared [`ReconnectSignal`].

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::reconnect::ReconnectSignal;
use crate::signal::{Outcome, Signal};
use crate::task::Task;
use crate::types::{Event, Status};

/// Per-attempt wait and retry state
pub struct WaitController {
    task: Task,
    reconnect: ReconnectSignal,
    events: broadcast::Sender<Event>,
    poll_interval: Duration,
    want_reconnect: bool,
    waiting: bool,
    retries: u32,
}

impl WaitController {
    /// Create a controller for `task`
    pub fn new(
        task: Task,
        reconnect: ReconnectSignal,
        events: broadcast::Sender<Event>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            task,
            reconnect,
            events,
            poll_interval,
            want_reconnect: false,
            waiting: false,
            retries: 0,
        }
    }

    /// Set the wait deadline to now + `seconds`
    ///
    /// `reconnect` marks that a reconnect would make the wait unnecessary.
    pub async fn set_wait(&mut self, seconds: u64, reconnect: bool) {
        if reconnect {
            self.want_reconnect = true;
        }
        let deadline = Instant::now() + Duration::from_secs(seconds);
        self.task.set_wait_until(deadline).await;
        tracing::debug!(
            task_id = %self.task.id(),
            seconds,
            reconnect,
            "Wait time set"
        );
    }

    /// Wait until the deadline set by [`set_wait`](Self::set_wait)
    ///
    /// Returns [`Signal::Abort`] or [`Signal::Reconnect`] within one poll interval of
    /// the abort flag or the reconnect signal being raised.
    pub async fn wait(&mut self) -> Outcome<()> {
        self.waiting = true;
        self.transition(Status::Waiting).await;

        while let Some(deadline) = self.task.wait_until().await {
            let now = Instant::now();
            if deadline <= now {
                break;
            }
            let tick = deadline.min(now + self.poll_interval);

            tokio::select! {
                biased;
                _ = self.task.abort_token().cancelled() => {}
                _ = self.reconnect.wait_set() => {}
                _ = tokio::time::sleep_until(tick) => {}
            }

            if self.task.is_aborted() {
                self.waiting = false;
                return Err(Signal::Abort);
            }
            if self.reconnect.is_set() {
                tracing::info!(task_id = %self.task.id(), "Wait interrupted by reconnect");
                self.waiting = false;
                self.want_reconnect = false;
                return Err(Signal::Reconnect);
            }
        }

        self.waiting = false;
        self.transition(Status::Starting).await;
        Ok(())
    }

    /// Wait `wait_seconds`, then restart `process` with [`Signal::Retry`]
    ///
    /// `max_tries` counts attempts: once the attempt number (`retries + 1`) reaches it
    /// the call fails with `reason` (or "Max retries reached"). Zero disables the bound.
    /// The returned signal is meant to be raised as `Err(..)`.
    pub async fn retry(&mut self, max_tries: u32, wait_seconds: u64, reason: &str) -> Signal {
        if max_tries > 0 && self.retries + 1 >= max_tries {
            let reason = if reason.is_empty() {
                "Max retries reached"
            } else {
                reason
            };
            tracing::warn!(
                task_id = %self.task.id(),
                retries = self.retries,
                max_tries,
                reason,
                "Retry limit reached"
            );
            return Signal::fail(reason);
        }

        self.want_reconnect = false;
        self.set_wait(wait_seconds, false).await;
        if let Err(signal) = self.wait().await {
            return signal;
        }

        self.retries += 1;
        tracing::info!(
            task_id = %self.task.id(),
            retries = self.retries,
            reason,
            "Retrying"
        );
        Signal::Retry(reason.to_string())
    }

    /// Retries made so far in this attempt
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Whether a reconnect would avoid the current wait
    pub fn want_reconnect(&self) -> bool {
        self.want_reconnect
    }

    /// Whether [`wait`](Self::wait) is in progress
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    async fn transition(&self, status: Status) {
        if self.task.set_status(status).await {
            self.events
                .send(Event::StatusChanged {
                    id: self.task.id(),
                    status,
                })
                .ok();
        }
    }
}
