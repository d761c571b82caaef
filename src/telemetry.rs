//! Tracing bootstrap for hosts embedding the sync core.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install the default `tracing` subscriber. Safe to call more than once;
/// only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        tracing_subscriber::fmt::init();
    });
}
