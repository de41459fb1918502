use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use crate::config::LogFormat;

/// `RUST_LOG` wins over `level`. Logs go to stderr.
pub fn init_logging(level: &str, format: LogFormat) {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let base = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => tracing_subscriber::registry().with(env).with(base.json()).init(),
        LogFormat::Compact => tracing_subscriber::registry().with(env).with(base.compact()).init(),
    }
}
