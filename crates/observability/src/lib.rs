//! Tracing/logging setup shared by NutriTrack binaries and test suites.

pub use crate::tracing::LogFormat;

/// Initialize process-wide tracing (JSON unless `NUTRITRACK_LOG_FORMAT`
/// says otherwise).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize tracing for a test binary (captured per test by libtest).
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Tracing configuration (filters, formats).
pub mod tracing;
