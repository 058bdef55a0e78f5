//! Structured logging setup.
//!
//! Logs go to stderr so stdout stays free for the progress bar and the final
//! JSON snapshots. `RUST_LOG` overrides the default filter.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "rollcall=debug,reqwest=info"
    } else {
        "rollcall=info,reqwest=warn"
    }
}

/// Install the global subscriber. Calling it twice is harmless.
pub fn init(verbose: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose);

    let _ = tracing_subscriber::registry().with(env_filter).with(layer).try_init();
}
