use std::fs::{self, File};
use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::Context;
use tracing::Level;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::project_dirs;
use crate::constants::LOG_FILE_NAME;

/// `--log-dir` when given, otherwise the user's data directory, otherwise
/// `./logs`.
pub fn log_dir(requested: Option<&Path>) -> PathBuf {
    match requested {
        Some(dir) => dir.to_path_buf(),
        None => project_dirs()
            .map(|dirs| dirs.data_local_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs")),
    }
}

fn filter(default: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy()
}

/// Initialize the tracing subscriber to log to a file and to stderr
///
/// Everything at `DEBUG` or above goes to `kuflex.log` inside `dir`; stderr
/// only gets `INFO` and above so the readiness animation stays readable.
/// `RUST_LOG` overrides both. The returned [`WorkerGuard`] must be kept alive
/// for the duration of the program so the file is flushed on shutdown.
pub fn init_tracing(dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(dir).wrap_err_with(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(LOG_FILE_NAME);
    let file = File::create(&path).wrap_err_with(|| format!("failed to create {}", path.display()))?;
    let (non_blocking, guard) = non_blocking(file);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(filter(Level::DEBUG));
    let stderr_layer = fmt::layer()
        .compact()
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(filter(Level::INFO));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(ErrorLayer::default())
        .try_init()
        .wrap_err("failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_log_dir_wins() {
        assert_eq!(log_dir(Some(Path::new("/var/log/kuflex"))), PathBuf::from("/var/log/kuflex"));
    }

    #[test]
    fn default_log_dir_is_named_logs() {
        assert!(log_dir(None).ends_with("logs"));
    }
}
