use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 預設過濾條件：`RUST_LOG` 優先，否則只輸出本 crate 指定等級以上的日誌
fn default_filter(level: &str, verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { level };
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cms_monit_match={}", level)))
}

/// Console logs go to stderr; stdout carries the matched records.
///
/// When `log_file` is given a second, non-blocking file layer is added. The
/// returned guard must stay alive until the process is about to exit, or
/// buffered lines are lost.
pub fn init_cli_logger(
    level: &str,
    verbose: bool,
    log_file: Option<&Path>,
) -> std::io::Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_filter(default_filter(level, verbose));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let directory = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(directory)?;
            let file_name = path.file_name().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("log file path has no file name: {}", path.display()),
                )
            })?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(default_filter(level, verbose));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
