use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "sh_session=info,sh_store=info";

/// Install the fmt subscriber, filtered by `RUST_LOG` or the crate defaults.
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .try_init();
}
