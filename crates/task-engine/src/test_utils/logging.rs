use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a test-friendly tracing subscriber.
///
/// `RUST_LOG` takes precedence; without it only warnings from the engine are shown. Safe to call
/// from every test, only the first call installs the subscriber.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(format!("task_engine={}", Level::WARN))
    };
    let _ = fmt().with_env_filter(filter).with_target(true).with_test_writer().try_init();
}
