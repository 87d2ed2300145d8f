use tracing_subscriber::EnvFilter;

/// Log to stderr so command output on stdout stays machine readable.
///
/// `RUST_LOG` takes precedence over `log_level`.
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
