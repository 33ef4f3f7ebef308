//! Helpers shared by unit tests.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes a `tracing` subscriber for tests, once per process.
///
/// Honors `RUST_LOG`; silent by default so test output stays readable.
pub(crate) fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_init_is_idempotent() {
        init_test_logging();
        init_test_logging();
    }
}
