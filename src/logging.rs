//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Install the global subscriber, writing to stderr
///
/// `RUST_LOG` takes precedence; otherwise `level` (e.g. `info`, `warn`) is
/// applied to this crate only so dependency noise stays out.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("proxy_sentinel={}", level)));

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
