use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::types::AdmissionPolicy;
use crate::server::monitoring::SYNC_METRICS;

/// Process-wide gate in front of the reference data source.
///
/// At most `max_concurrent` submitted tasks run at once, waiters are admitted in FIFO order,
/// and consecutive dispatches are at least `min_interval` apart no matter which slot they use.
/// A finishing task hands its slot straight to the oldest waiter, so the queue drains itself
/// without a background driver.
///
/// One instance is shared (behind an `Arc`) by every orchestrator that talks to the same source.
#[derive(Debug)]
pub struct AdmissionQueue {
    policy: AdmissionPolicy,
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    running: usize,
    last_dispatch: Option<Instant>,
    waiting: VecDeque<oneshot::Sender<()>>,
}

impl AdmissionQueue {
    pub fn new(policy: AdmissionPolicy) -> Self {
        Self {
            policy: AdmissionPolicy {
                max_concurrent: policy.max_concurrent.max(1),
                ..policy
            },
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Number of tasks currently holding a slot.
    pub fn running(&self) -> usize {
        self.lock_state().running
    }

    /// Number of submissions still waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.lock_state()
            .waiting
            .iter()
            .filter(|sender| !sender.is_closed())
            .count()
    }

    /// Runs `task` once a slot is free and the pacing clock allows it, then returns its output.
    ///
    /// The slot is released when the task's future completes or is dropped.
    pub async fn submit<T, F, Fut>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _slot = self.acquire().await;
        self.pace().await;
        task().await
    }

    async fn acquire(&self) -> QueueSlot<'_> {
        loop {
            let receiver = {
                let mut state = self.lock_state();
                state.waiting.retain(|sender| !sender.is_closed());
                if state.running < self.policy.max_concurrent && state.waiting.is_empty() {
                    state.running += 1;
                    publish_depth(&state);
                    return QueueSlot { queue: self };
                }

                let (sender, receiver) = oneshot::channel();
                state.waiting.push_back(sender);
                publish_depth(&state);
                receiver
            };

            let mut pending = PendingAdmission {
                queue: self,
                receiver: Some(receiver),
            };
            if pending.granted().await {
                return QueueSlot { queue: self };
            }
        }
    }

    /// Reserves the next dispatch instant under the lock, then sleeps until it.
    async fn pace(&self) {
        let (dispatch_at, now) = {
            let mut state = self.lock_state();
            let now = Instant::now();
            let at = match state.last_dispatch {
                Some(last) => now.max(last + self.policy.min_interval),
                None => now,
            };
            state.last_dispatch = Some(at);
            (at, now)
        };
        if dispatch_at > now {
            tokio::time::sleep_until(dispatch_at).await;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gives a finished slot to the oldest live waiter, or frees it.
    fn release_locked(&self, state: &mut QueueState) {
        while let Some(sender) = state.waiting.pop_front() {
            if sender.send(()).is_ok() {
                publish_depth(state);
                return;
            }
        }
        state.running = state.running.saturating_sub(1);
        publish_depth(state);
    }
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new(AdmissionPolicy::default())
    }
}

/// Held for the lifetime of one admitted task.
struct QueueSlot<'a> {
    queue: &'a AdmissionQueue,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.lock_state();
        self.queue.release_locked(&mut state);
    }
}

/// A submission parked in the FIFO.
struct PendingAdmission<'a> {
    queue: &'a AdmissionQueue,
    receiver: Option<oneshot::Receiver<()>>,
}

impl PendingAdmission<'_> {
    async fn granted(&mut self) -> bool {
        let Some(receiver) = self.receiver.as_mut() else {
            return false;
        };
        let granted = receiver.await.is_ok();
        self.receiver = None;
        granted
    }
}

impl Drop for PendingAdmission<'_> {
    fn drop(&mut self) {
        let Some(mut receiver) = self.receiver.take() else {
            return;
        };
        // Hand-offs happen under this lock, so after taking it the grant either already
        // landed in the channel or can no longer be sent.
        let mut state = self.queue.lock_state();
        if receiver.try_recv().is_ok() {
            self.queue.release_locked(&mut state);
        }
        drop(receiver);
    }
}

fn publish_depth(state: &QueueState) {
    if let Some(metrics) = SYNC_METRICS.get() {
        metrics.queue_running.set(state.running as i64);
        metrics.queue_waiting.set(state.waiting.len() as i64);
    }
}
