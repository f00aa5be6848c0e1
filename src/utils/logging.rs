//! Tracing (logging)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise tracing (logging)
///
/// Applies a filter based on the `RUST_LOG` environment variable, falling back to the given
/// level for this crate. Logs go to stderr so stage subcommands can print status JSON on stdout.
pub fn init_tracing(level: &str) {
    let fallback = format!("aq_processor={},warn", level);
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
