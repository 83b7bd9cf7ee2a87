use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Noisy dependencies held at warn: sqlx logs every statement, the HTTP
/// stacks log every connection.
const QUIET_TARGETS: &[&str] = &["sqlx", "hyper", "hyper_util", "reqwest", "h2"];

fn directives(level: &str) -> String {
    let mut out = level.to_string();
    for target in QUIET_TARGETS {
        out.push_str(&format!(",{target}=warn"));
    }
    out
}

fn appender(config: &AppConfig) -> RollingFileAppender {
    let (dir, file) = (&config.log_dir, &config.log_file);
    match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(dir, file),
        "daily" => tracing_appender::rolling::daily(dir, file),
        _ => tracing_appender::rolling::never(dir, file),
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `log_level`.
///
/// JSON mode writes structured lines to the file only (payment and order
/// numbers are span/event fields there); text mode also echoes to stdout.
/// Keep the guard alive for the process lifetime.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(appender(config));
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(&config.log_level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(writer).with_ansi(false))
            .with(fmt::layer().with_target(false))
            .init();
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_quiet_dependencies() {
        let d = directives("debug");
        assert!(d.starts_with("debug,"));
        assert!(d.contains("sqlx=warn"));
        assert!(d.contains("reqwest=warn"));
        assert!(EnvFilter::try_new(&d).is_ok());
    }
}
