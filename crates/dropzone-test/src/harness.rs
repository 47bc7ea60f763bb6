//! Test logging setup.

use tracing_subscriber::EnvFilter;

/// Initialize a test-writer subscriber with `filter`.
///
/// Safe to call from every test; only the first call installs it.
pub fn setup_test_logging(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_test_writer()
        .try_init();
}

/// Set up test logging with the default filter (warn level).
pub fn setup_test_logging_default() {
    setup_test_logging("warn");
}
