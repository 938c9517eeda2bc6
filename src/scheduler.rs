use crate::session::SessionEvent;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Handle to a single-shot timer started by [`schedule`]. Dropping the
/// handle leaves the timer running; only [`TimerHandle::cancel`] stops it.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn cancel(self) {
        self.task.abort();
    }
}

/// Runs `action` once after `delay` on the tokio runtime.
pub fn schedule<F>(delay: Duration, action: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        action();
    });
    TimerHandle { task }
}

/// The pending auto-recover for one session.
///
/// Arming replaces any earlier timer. Each arm or cancel bumps the
/// generation, so an elapsed message that was already queued when the
/// timer was replaced can be told apart with [`is_current`](Self::is_current).
#[derive(Debug, Default)]
pub struct AutoRecoverTimer {
    pending: Option<TimerHandle>,
    deadline: Option<Instant>,
    generation: u64,
}

impl AutoRecoverTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, delay: Duration, tx: UnboundedSender<SessionEvent>) -> u64 {
        self.cancel();
        let generation = self.generation;
        debug!(generation, delay_secs = delay.as_secs(), "auto-recover armed");

        self.deadline = Some(Instant::now() + delay);
        self.pending = Some(schedule(delay, move || {
            // The session may already be gone; nothing to recover then.
            let _ = tx.send(SessionEvent::AutoRecoverElapsed { generation });
        }));
        generation
    }

    /// Stops the pending timer. Returns whether one was armed.
    pub fn cancel(&mut self) -> bool {
        self.generation += 1;
        self.deadline = None;
        match self.pending.take() {
            Some(handle) => {
                debug!("auto-recover cancelled");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.pending.is_some() && generation == self.generation
    }

    /// Marks the timer as fired if `generation` is current.
    pub fn take_elapsed(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.pending = None;
        self.deadline = None;
        true
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}
