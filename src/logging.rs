//! Tracing subscriber setup.
//!
//! `RUST_LOG` drives the filter; without it the crate logs at `info`.
//! With a log directory configured, output goes to a daily-rolling file
//! through a non-blocking writer whose guard must outlive the server.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

const DEFAULT_FILTER: &str = "ecocollect=info,axum=info";

pub fn init(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ecocollect.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let builder = fmt().with_env_filter(filter).with_writer(writer).with_ansi(false);
            if config.log_json {
                builder.json().init();
            } else {
                builder.init();
            }
            Some(guard)
        }
        None => {
            let builder = fmt().with_env_filter(filter);
            if config.log_json {
                builder.json().init();
            } else {
                builder.init();
            }
            None
        }
    }
}
