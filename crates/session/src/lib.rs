//! `nutritrack-session`: client-side authentication session layer.
//!
//! Keeps one observable [`SessionStore`] consistent with a hosted identity
//! provider:
//!
//! - startup restores the stored session (or a demo identity) exactly once
//!   per mount
//! - pushed auth changes are queued, gated on startup, deduplicated and
//!   folded into the store
//! - role/coach/admin are resolved in the background under a fixed deadline
//! - a fallback timer guarantees `loading` ends
//!
//! Writes are tagged with the mount that produced them, so nothing from an
//! unmounted instance can reach a newer one.

pub mod audit;
pub mod config;
pub mod demo;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod manager;
pub mod memory;
pub mod provider;
pub mod resolver;
pub mod store;

mod initializer;
mod mount;
mod reconciler;

pub use audit::{ActorAccessor, AuditLevel, AuditLog, AuditRecord, AuditSink, NullAuditSink};
pub use config::SessionConfig;
pub use demo::{DemoIdentity, DemoMode, DemoRole, InMemoryPreferences, PreferenceStore};
pub use error::{SessionError, SessionResult};
pub use fetch::{BoundedFetch, FieldOutcome, Settled};
pub use lifecycle::{LifecycleGuard, Phase};
pub use manager::SessionManager;
pub use provider::{AuthorizationService, IdentityProvider};
pub use resolver::AuthorizationResolver;
pub use store::{AuthSnapshot, MountId, SessionStore};
