use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, filter::Builder, layer::SubscriberExt, util::SubscriberInitExt,
};

pub const LOG_ENV: &str = "RLPLUG_LOG";

/// Installs the global subscriber. Filter directives come from `RLPLUG_LOG`,
/// defaulting to INFO.
pub fn init_log() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter_builder().from_env_lossy())
        .init();
}

fn filter_builder() -> Builder {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(LOG_ENV)
}
