/// Single-slot activity notification between the output relays and the supervisor.
///
/// Raising never blocks and never queues more than one pending notification:
/// a raise while one is already pending is absorbed. The supervisor drains
/// it by awaiting [`ActivityListener::raised`], which clears the slot.
use std::sync::Arc;
use tokio::sync::Notify;

/// Raising half, cloned into every relay of one child instance.
#[derive(Clone)]
pub struct ActivitySignal {
    notify: Arc<Notify>,
}

/// Draining half, owned by the supervisor of the same child instance.
pub struct ActivityListener {
    notify: Arc<Notify>,
}

/// Create a fresh signal pair for one child instance.
pub fn channel() -> (ActivitySignal, ActivityListener) {
    let notify = Arc::new(Notify::new());
    (
        ActivitySignal {
            notify: Arc::clone(&notify),
        },
        ActivityListener { notify },
    )
}

impl ActivitySignal {
    pub fn raise(&self) {
        // notify_one stores at most one permit when nobody is waiting.
        self.notify.notify_one();
    }
}

impl ActivityListener {
    /// Resolves once at least one raise happened since the last drain.
    ///
    /// Cancel safe: a notification is never lost if the future is dropped
    /// before completing.
    pub async fn raised(&self) {
        self.notify.notified().await;
    }

    /// Drain a pending notification without waiting. Returns whether one was pending.
    pub async fn drain_pending(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.raised() => true,
            _ = std::future::ready(()) => false,
        }
    }
}
