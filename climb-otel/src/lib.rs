//! Tracing bootstrap for climb-hub binaries.
//!
//! A single entry point, [`init`], installs a [`tracing_subscriber::Registry`]
//! with an [`tracing_subscriber::EnvFilter`] driven by `CLIMB_LOG` (falling
//! back to `info`) and a human-readable `fmt` layer. Call it once, as early as
//! possible in `main`.

use tracing_subscriber::{fmt, EnvFilter};

const ENV_VAR: &str = "CLIMB_LOG";
const DEFAULT_FILTER: &str = "info";

/// Install the global tracing subscriber. Safe to call more than once; later
/// calls are no-ops (mirrors `tracing::subscriber::set_global_default`'s own
/// idempotence guard).
pub fn init() {
    let filter = EnvFilter::try_from_env(ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .finish();

    // A second `init()` call (e.g. in tests that share a process) would panic
    // on `set_global_default`; swallow that case the way a library bootstrap
    // should.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }
}
