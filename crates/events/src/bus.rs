//! Inbound auth-change queue.
//!
//! Providers push auth changes from their own callbacks; the client consumes
//! them from a single queue so ordering and dedup can be reasoned about (and
//! tested) without a real provider.
//!
//! A [`Subscription`] is the consuming end of that queue. Each subscription
//! receives every change published after it was created, in publish order.
//! Dropping the receiver is not enough to stop delivery on every source, so
//! the paired [`SubscriptionHandle`] detaches it explicitly.

use tokio::sync::mpsc;

use crate::AuthChange;

/// Receiving end of an auth-change stream.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<AuthChange>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<AuthChange>, handle: SubscriptionHandle) -> Self {
        Self { receiver, handle }
    }

    /// Wait for the next change. `None` once the source is gone or detached.
    pub async fn recv(&mut self) -> Option<AuthChange> {
        self.receiver.recv().await
    }

    /// Split into the queue and its detach handle so they can live in
    /// different owners (a consumer task and whoever tears it down).
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<AuthChange>, SubscriptionHandle) {
        (self.receiver, self.handle)
    }

    pub fn unsubscribe(self) {
        self.handle.unsubscribe();
    }
}

/// Detaches a subscription from its source.
pub struct SubscriptionHandle {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl core::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}
