use std::sync::Once;

use logforth::append;
use logforth::filter::EnvFilter;

static INIT: Once = Once::new();

/// Installs the global stderr logger, filtered by `RUST_LOG`.
///
/// Idempotent, so every test harness can call it unconditionally; only the
/// first call installs.
pub fn init() {
    INIT.call_once(|| {
        logforth::builder()
            .dispatch(|d| {
                d.filter(EnvFilter::from_default_env())
                    .append(append::Stderr::default())
            })
            .apply();
    });
}
