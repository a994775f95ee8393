//! One-shot timers for the session manager.
//!
//! The manager never sleeps. Every delayed action (scan window, connect
//! timeout, refresh tick, delayed reconnect) is scheduled here and comes back
//! as a call to [`SessionManager::handle_timer`](super::SessionManager::handle_timer).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// The scan window elapsed.
    ScanWindow,
    /// The connect attempt took too long.
    ConnectTimeout,
    /// Periodic re-read of every characteristic.
    Refresh,
    /// Delayed reconnect to the last known sensor.
    Reconnect,
}

/// Identifies one scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Schedules one-shot timers.
pub trait Scheduler {
    /// Fire `kind` after `delay`.
    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerId;

    /// Cancel a pending timer. Unknown or already fired ids are ignored.
    fn cancel(&mut self, id: TimerId);
}

/// A timer that elapsed, as delivered to the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// The timer's id.
    pub id: TimerId,
    /// The timer's kind.
    pub kind: TimerKind,
}

/// [`Scheduler`] backed by tokio sleeps.
///
/// Each timer is a spawned task that posts a [`TimerFired`] to the session
/// loop's channel; cancelling aborts the task.
pub struct TokioScheduler {
    next_id: u64,
    tasks: Arc<Mutex<HashMap<TimerId, tokio::task::JoinHandle<()>>>>,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl TokioScheduler {
    /// Create a scheduler posting to `fired_tx`. Must be used inside a tokio
    /// runtime.
    pub fn new(fired_tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            next_id: 0,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            fired_tx,
        }
    }

    /// Number of timers not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Abort every pending timer.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.tasks.lock().drain() {
            handle.abort();
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);

        let fired_tx = self.fired_tx.clone();
        let tasks = self.tasks.clone();

        // Held until the handle is stored, so the task cannot remove its
        // entry before it exists.
        let mut pending = self.tasks.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tasks.lock().remove(&id);
            trace!("Timer {:?} ({:?}) fired", id, kind);
            let _ = fired_tx.send(TimerFired { id, kind });
        });
        pending.insert(id, handle);
        drop(pending);

        trace!("Scheduled {:?} as {:?} in {:?}", kind, id, delay);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.tasks.lock().remove(&id) {
            handle.abort();
            trace!("Cancelled timer {:?}", id);
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(tx);

        let id = scheduler.schedule(TimerKind::ScanWindow, Duration::from_secs(10));
        assert_eq!(scheduler.pending(), 1);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(rx.try_recv().is_err());

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, TimerFired { id, kind: TimerKind::ScanWindow });
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(tx);

        let stale = scheduler.schedule(TimerKind::ConnectTimeout, Duration::from_secs(1));
        let live = scheduler.schedule(TimerKind::ConnectTimeout, Duration::from_secs(2));
        scheduler.cancel(stale);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.id, live);
        assert_ne!(stale, live);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_immediate_timers_leave_nothing_pending() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(tx);

        for _ in 0..200 {
            scheduler.schedule(TimerKind::Refresh, Duration::ZERO);
        }
        for _ in 0..200 {
            rx.recv().await.unwrap();
        }

        assert_eq!(scheduler.pending(), 0);
    }
}
