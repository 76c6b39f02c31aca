use tracing_subscriber::EnvFilter;

/// Logs go to stderr; stdout carries the IPC responses. `RUST_LOG` overrides
/// the configured level.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    // A second init (tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

pub fn default_filter(level: &str) -> String {
    format!("attendanced={},warn", level.to_ascii_lowercase())
}
