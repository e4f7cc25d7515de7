//! Logging setup
//!
//! Lifecycle events carry a stable `event` field so they can be filtered in
//! JSON output regardless of the message text.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Values of the `event` field on lifecycle logs
pub mod event {
    pub const SVC_STARTED: &str = "svc_started";
    pub const SVC_SHUTDOWN: &str = "svc_shutdown";
    pub const DEV_REGISTERED: &str = "dev_registered";
    pub const CFG_PATCH_CREATED: &str = "cfg_patch_created";
    pub const WS_CONN_ADDED: &str = "ws_conn_added";
    pub const WS_CONN_REMOVED: &str = "ws_conn_removed";
    pub const PANIC: &str = "panic";
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("devhub={},tower_http=debug", config.level))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}
