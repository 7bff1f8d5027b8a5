// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CLI output formatting with colors and styling.
//!
//! Respects NO_COLOR and FORCE_COLOR environment variables.

use colored::{ColoredString, Colorize};

/// Initialize color support based on environment.
/// Call once at startup.
pub fn init() {
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    } else if std::env::var("FORCE_COLOR").is_ok() {
        colored::control::set_override(true);
    }
}

pub fn error_label() -> ColoredString {
    "error".red().bold()
}

pub fn fault_label() -> ColoredString {
    "fault".yellow().bold()
}

pub fn level_label(level: log::Level) -> ColoredString {
    let name = level.as_str().to_lowercase();
    match level {
        log::Level::Error => name.red().bold(),
        log::Level::Warn => name.yellow(),
        log::Level::Info => name.green(),
        log::Level::Debug => name.blue(),
        log::Level::Trace => name.dimmed(),
    }
}

pub fn title(name: &str) -> ColoredString {
    name.bold()
}

pub fn section_header(header: &str) -> ColoredString {
    header.yellow().bold()
}

pub fn command(name: &str) -> ColoredString {
    name.green()
}

pub fn arg(name: &str) -> ColoredString {
    name.cyan()
}
