//! Auth state-change events pushed by the identity provider.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{Subscription, SubscriptionHandle};
pub use envelope::{AuthChange, EventSignature};
pub use event::AuthEventKind;
pub use in_memory_bus::InMemoryAuthBus;
