//! Log subscriber installation for the `log_level` initialize option

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a `fmt` subscriber whose default level is `level`.
///
/// Directives in `RUST_LOG` still apply. Returns `false` when the process
/// already has a global subscriber; that subscriber is kept.
pub fn init(level: Level) -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
