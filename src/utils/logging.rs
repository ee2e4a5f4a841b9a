use std::{path::Path, sync::LazyLock};

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{
    fmt::{format::FmtSpan, writer::MakeWriterExt},
    EnvFilter,
};

pub const LOG_PREFIX: &str = "tracker";
const LOG_DIR: &str = "logs";
const KEPT_LOG_FILES: usize = 5;

/// Filter directives for the tracker at `level`. The http stack only reports warnings, it
/// would otherwise log every poll of the backend.
fn log_directives(level: &str) -> String {
    format!(
        "{}={level},reqwest=warn,hyper=warn",
        env!("CARGO_PKG_NAME").replace('-', "_"),
    )
}

/// Logs into daily files under `<application_data_path>/logs`. With `show_std` lines are also
/// echoed to stderr, stdout belongs to command output.
pub fn enable_logging(
    prefix: &str,
    application_data_path: &Path,
    log_level: Option<LevelFilter>,
    show_std: bool,
) -> Result<()> {
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .max_log_files(KEPT_LOG_FILES)
        .filename_prefix(prefix)
        .build(application_data_path.join(LOG_DIR))?;

    let console = std::io::stderr.with_filter(move |_| show_std);

    let level = log_level
        .map(|v| v.to_string())
        .unwrap_or_else(|| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_directives(&level)))
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(console.and(appender))
        .pretty()
        .init();
    Ok(())
}

pub static TEST_LOGGING: LazyLock<()> = LazyLock::new(|| {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .pretty()
        .init()
});

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::log_directives;

    #[test]
    fn test_log_directives() {
        assert_eq!(
            log_directives(&LevelFilter::DEBUG.to_string()),
            "realcon_tracker=debug,reqwest=warn,hyper=warn"
        );
    }
}
