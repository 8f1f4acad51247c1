use std::env;
use std::ffi::OsStr;
use std::path::Path;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const MIGRATOR_TARGETS: [&str; 2] = ["jellyfin_migrator", "jellyfin_migrator_core"];

/// Dependencies only get through at `warn`; the migrator's own crates at `level`.
/// A value that already holds directives (`target=level`, lists) is used as given.
fn migrator_filter(level: &str) -> EnvFilter {
    if level.contains('=') || level.contains(',') {
        return EnvFilter::new(level);
    }
    let directives = MIGRATOR_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(format!("warn,{}", directives))
}

pub fn init_logger() -> impl Drop {
    let console_level = env::var("TRACING_LEVEL").unwrap_or_else(|_| "info".to_string());
    let file_level = env::var("LOG_FILE_LEVEL").unwrap_or_else(|_| "debug".to_string());

    let log_file_path = env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "./logs/jellyfin-migrator.log".to_string());
    let log_file_path = Path::new(&log_file_path);
    let directory = log_file_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file_path
        .file_name()
        .unwrap_or_else(|| OsStr::new("jellyfin-migrator.log"));

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .pretty()
                .with_file(false)
                .without_time()
                .with_ansi(true)
                .with_filter(migrator_filter(&console_level)),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_thread_names(true)
                .with_filter(migrator_filter(&file_level)),
        )
        .init();

    info!(
        "Logging {} to stdout and {} to {}",
        console_level,
        file_level,
        log_file_path.display()
    );

    guard
}
