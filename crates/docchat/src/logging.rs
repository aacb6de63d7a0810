use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber: stderr always, plus a daily-rolling file
/// when `logging.dir` is set. `RUST_LOG` overrides `logging.level`.
///
/// Calling this more than once is harmless; later calls are ignored. If the
/// log directory cannot be created, logging continues on stderr only and a
/// warning says so.
pub fn init(config: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let mut dir_error = None;
    let file_layer = config.dir.as_ref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            dir_error = Some((dir.clone(), e));
            return None;
        }
        let file_appender = tracing_appender::rolling::daily(dir, "docchat.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    if let Some((dir, e)) = dir_error {
        tracing::warn!(dir = %dir.display(), error = %e, "cannot create log directory; file logging disabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unusable_log_dir_does_not_panic() {
        let tmp = tempfile::TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        init(&LoggingConfig {
            level: "warn".to_string(),
            dir: Some(blocker.join("logs")),
        });
        assert!(!blocker.join("logs").exists());
    }
}
