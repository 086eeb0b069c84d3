use colored::{ColoredString, Colorize};
use env_logger::Builder;
use log::{Level, LevelFilter, Record};
use std::io::Write;
use std::thread;

use crate::JobStatus;

/// Terminal colors for job status in CLI output.
pub struct Colors;

impl Colors {
    pub fn status(status: JobStatus) -> ColoredString {
        let s = status.as_str();
        match status {
            JobStatus::InProgress => s.cyan(),
            JobStatus::IdsPublished => s.green(),
            JobStatus::IdPublishingCancelled => s.yellow(),
            JobStatus::Failed => s.red(),
        }
    }
}

/// Background threads (reindex passes, sink delivery, cursor readers) tag their lines.
fn thread_tag() -> Option<String> {
    let current = thread::current();
    match current.name() {
        None | Some("main") => None,
        Some(name) => Some(name.to_string()),
    }
}

fn format_line(record: &Record) -> String {
    let name = env!("CARGO_PKG_NAME").cyan();
    let tag = thread_tag()
        .map(|t| format!(" {}", t.dimmed()))
        .unwrap_or_default();
    match record.level() {
        Level::Error => format!("[{}{} {} {}] {}", name, tag, "ERROR".red(), record.target().white(), record.args()),
        Level::Warn => format!("[{}{} {} {}] {}", name, tag, "WARN".yellow(), record.target().white(), record.args()),
        _ => format!("[{}{}] {}", name, tag, record.args()),
    }
}

/// Warnings from dependencies, `Info` (or `Debug` when verbose) from this crate. `RUST_LOG` still applies.
pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    // Library callers may already have a logger installed.
    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_PKG_NAME"), level)
        .format(|buf, record| writeln!(buf, "{}", format_line(record)))
        .try_init();
}
