use sift_config::{init_tracing, LoggingConfig};

#[test]
fn init_tracing_is_idempotent() {
    let config = LoggingConfig {
        level: "sift=debug".to_owned(),
        stderr: false,
        ..LoggingConfig::default()
    };

    // Only the first call can install the global subscriber.
    let _ = init_tracing(&config);
    assert!(!init_tracing(&config));

    tracing::info!(target: "sift.config", "tracing initialized");
}
