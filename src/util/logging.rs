use std::path::Path;

use time::macros::format_description;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

/// Installs the global subscriber.
///
/// With a `log_dir` events go to `<log_dir>/<file_name>` through a
/// non-blocking writer whose guard must be kept alive; otherwise they go to
/// stderr. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging(log_dir: Option<&Path>, file_name: &str) -> Option<WorkerGuard> {
    let timer = LocalTime::new(
        format_description!("[month]/[day]/[year] [hour repr:24]:[minute]:[second].[subsecond digits:4]"));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(timer)
                .init();
            Some(guard)
        },
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_timer(timer)
                .init();
            None
        }
    }
}
