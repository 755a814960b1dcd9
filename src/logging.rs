//! One-shot logging initializer, `RUST_LOG`-driven with a default of `info`.
//!
//! The teacher crate (`byte271-6cy`) has no logging dependency at all — it
//! only ever calls `println!`/`eprintln!` — but spec.md §7 requires a clean
//! stdout/stderr split ("on success each processed rel_path is printed to
//! standard output... progress, diagnostics, and errors go to standard
//! error"), which is exactly what routing diagnostics through `tracing`
//! instead of `println!` gives for free: `tracing-subscriber`'s default
//! writer is stderr, leaving stdout free for the one-rel_path-per-line
//! success output the pipelines print directly.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global `tracing` subscriber. Safe to call more than once;
/// subsequent calls are no-ops (`set_global_default` failures are ignored,
/// matching the common CLI pattern of calling this once from `main`).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}
