//! Tracing bootstrap shared by the broker binary and by integration tests.
//!
//! A single `fmt` subscriber configured from `RUST_LOG`/`PIMD_LOG`, with a
//! sane default filter so a broker started without any environment
//! variables still logs at `info` for its own crates and `warn` for
//! dependencies.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,pimd=info";

/// Installs a global `tracing` subscriber. Safe to call once at process
/// start; calling it twice in the same process (e.g. from two `#[tokio::test]`
/// functions) is tolerated and simply keeps the first subscriber.
pub fn init() {
    let filter = EnvFilter::try_from_env("PIMD_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
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
