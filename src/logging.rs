//! Logging initialization
//!
//! Operational logs go through `tracing`; the metadata ledger remains the
//! durable history of backups. Output is written to stderr so command output
//! on stdout stays machine-readable.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Logging profile configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Profile {
    /// Human-readable warnings and errors only
    #[default]
    Console,
    /// Human-readable output at debug level
    Development,
    /// JSON structured output at info level
    Production,
    /// Output captured by the test harness
    Test,
}

static INIT_ONCE: Once = Once::new();

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize the logging facility
///
/// Only the first call has an effect. `RUST_LOG` overrides the profile's
/// default filter.
pub fn init(profile: Profile) {
    INIT_ONCE.call_once(|| {
        // A subscriber installed elsewhere (e.g. by an embedding app) wins
        let _ = match profile {
            Profile::Console => tracing_subscriber::fmt()
                .without_time()
                .with_target(false)
                .with_env_filter(filter("keepsafe=warn"))
                .with_writer(std::io::stderr)
                .try_init(),
            Profile::Development => tracing_subscriber::fmt()
                .with_env_filter(filter("keepsafe=debug"))
                .with_writer(std::io::stderr)
                .try_init(),
            Profile::Production => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter("keepsafe=info"))
                .with_writer(std::io::stderr)
                .try_init(),
            Profile::Test => tracing_subscriber::fmt()
                .with_env_filter(filter("keepsafe=debug"))
                .with_test_writer()
                .try_init(),
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_idempotent() {
        init(Profile::Test);
        init(Profile::Test);
        init(Profile::Development);
    }
}
