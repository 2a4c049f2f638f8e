//! Process-wide tracing setup shared by the binaries.

/// Initialize structured logging for the process.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber construction (filter, JSON layer).
pub mod tracing;
