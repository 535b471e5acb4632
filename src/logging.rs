//! Tracing setup for the binary: JSON lines to a daily file, human-readable text to stderr.

use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE_PREFIX: &str = "ingest.log";
const DEFAULT_FILTER: &str = "event_ingest=info,warn";

pub fn init_logging(log_dir: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A missing log dir only costs the file layer its output
    let _ = fs::create_dir_all(log_dir);
    let (file_writer, flush_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX));

    let file_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_writer(file_writer);

    // stdout carries the repair plan and ingest report
    let console_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    // Lives for the whole process so buffered lines reach the file
    std::mem::forget(flush_guard);
}
