//! In-memory auth-change bus for tests/dev providers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::mpsc;

use crate::bus::{Subscription, SubscriptionHandle};
use crate::AuthChange;

/// In-memory pub/sub bus.
///
/// - No IO
/// - Best-effort fan-out, publish order preserved per subscriber
/// - Subscribers whose receiver was dropped are pruned on the next publish
#[derive(Debug, Default)]
pub struct InMemoryAuthBus {
    subscribers: Mutex<Vec<(u64, mpsc::UnboundedSender<AuthChange>)>>,
    next_id: AtomicU64,
}

impl InMemoryAuthBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver `change` to every live subscriber. Returns how many got it.
    pub fn publish(&self, change: AuthChange) -> usize {
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);

        // Drop any dead subscribers while publishing.
        subs.retain(|(_, tx)| tx.send(change.clone()).is_ok());

        subs.len()
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, tx));

        let bus: Weak<Self> = Arc::downgrade(self);
        let handle = SubscriptionHandle::new(move || {
            if let Some(bus) = bus.upgrade() {
                bus.detach(id);
            }
        });

        Subscription::new(rx, handle)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn detach(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(sub_id, _)| *sub_id != id);
    }
}
