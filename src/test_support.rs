//! Test support: global logging setup
//!
//! Installs a test-friendly tracing subscriber once per test binary, so
//! `RUST_LOG=debug cargo test` shows what the dispatch tasks are doing.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialize test logging globally - safe to call multiple times
pub fn init() {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));

        fmt()
            .with_env_filter(env_filter)
            .with_test_writer()
            .with_target(true)
            .compact()
            .try_init()
            .ok();
    });
}

#[ctor::ctor]
fn init_test_logging() {
    init();
}
