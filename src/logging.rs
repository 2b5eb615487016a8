//! Diagnostic logging
//!
//! The library never installs a subscriber on its own initiative: a host
//! application usually has one. Setting `SHST_LOG` (an `EnvFilter`
//! directive such as `shadowstack=debug`) asks us to install a stderr
//! subscriber the first time a thread starts monitoring.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

use crate::config::ENV_LOG;

static INIT: Once = Once::new();

/// Install a stderr subscriber if `SHST_LOG` is set
///
/// Runs at most once per process. A subscriber installed by the host wins.
pub fn init_from_env() {
    INIT.call_once(|| {
        if let Ok(directives) = std::env::var(ENV_LOG) {
            init_with_filter(&directives);
        }
    });
}

fn init_with_filter(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("shadowstack: invalid {ENV_LOG} filter {directives:?}: {e}");
        EnvFilter::new("warn")
    });
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(filter = directives, "shadowstack logging enabled");
    }
}
