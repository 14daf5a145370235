use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "newsrelay=info";

/// Logs go to stderr so command output on stdout stays clean. `RUST_LOG` overrides the
/// default level.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
