// =============================================================================
// Logging — tracing subscriber setup
// =============================================================================

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops. Returns `false` when
/// a global subscriber was already installed.
pub fn init() -> bool {
    init_with_default("info")
}

/// Same as [`init`] with a custom fallback filter directive.
pub fn init_with_default(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init_with_default("debug");
        assert!(!init());
    }
}
