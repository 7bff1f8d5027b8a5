// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Stderr backend for the `log` facade.
//!
//! Level comes from `COOP_LOG` (error, warn, info, debug, trace, off) when
//! set, otherwise from the number of `-v` flags.

use std::io::Write;

use log::{LevelFilter, Log, Metadata, Record};

use crate::output;

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut err = std::io::stderr().lock();
        let _ = writeln!(
            err,
            "{} [{}] {}",
            output::level_label(record.level()),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn level_for(verbosity: usize) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn init(verbosity: usize) {
    let level = std::env::var("COOP_LOG")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or_else(|| level_for(verbosity));
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
