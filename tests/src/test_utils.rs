//! Test utility functions for integration tests
//!
//! Provides common utilities for test setup and logging.

use epcsim_common::{env_filter, LogLevel};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::fmt;

/// Result type for integration tests
pub type TestResult<T = ()> = anyhow::Result<T>;

/// Initialize logging for tests at the default level
///
/// RUST_LOG overrides the level when set.
pub fn init_test_logging() {
    init_test_logging_at(LogLevel::default());
}

/// Initialize logging for tests at `level`, captured by the test harness
pub fn init_test_logging_at(level: LogLevel) {
    let _ = fmt().with_env_filter(env_filter(level)).with_test_writer().try_init();
}

/// Deterministic random generator for a test
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}
