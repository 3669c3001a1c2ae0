//! Tracing setup and span helpers.
//!
//! The library only emits `tracing` events; installing a subscriber is
//! left to the host process. `init_tracing` is a convenience for binaries
//! and tests that want the usual `RUST_LOG`-driven formatter.

use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber filtered by `RUST_LOG`, falling back
/// to `default_directive` (e.g. `"hlcs=info"`).
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Span wrapping one knowledge retrieval.
pub fn retrieval_span(top_k: usize) -> Span {
    tracing::info_span!("hlcs.retrieve", top_k, candidates = tracing::field::Empty)
}

/// Span wrapping one consolidation pass.
pub fn consolidation_span() -> Span {
    tracing::info_span!(
        "hlcs.consolidate",
        promoted = tracing::field::Empty,
        expired = tracing::field::Empty
    )
}

/// Span wrapping one orchestrated request.
pub fn request_span(request_id: &str) -> Span {
    tracing::info_span!(
        "hlcs.process",
        request_id,
        strategy = tracing::field::Empty,
        complexity = tracing::field::Empty
    )
}
