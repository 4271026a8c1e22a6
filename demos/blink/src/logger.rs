use std::io::Write;

use log::{Level, Metadata, Record};

struct StderrLogger {
    level: Level,
}

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let thread = std::thread::current();
            let mut err = std::io::stderr().lock();
            writeln!(
                err,
                "[{:<5} {} {}] {}",
                record.level(),
                thread.name().unwrap_or("?"),
                record.target(),
                record.args()
            )
            .ok();
        }
    }

    fn flush(&self) {
        std::io::stderr().flush().ok();
    }
}

/// Installs the stderr logger. `PT_LOG` selects the level (default `info`).
pub fn init() {
    let level = std::env::var("PT_LOG")
        .ok()
        .and_then(|value| value.parse::<Level>().ok())
        .unwrap_or(Level::Info);
    let logger = Box::new(StderrLogger { level });
    if log::set_boxed_logger(logger).is_ok() {
        log::set_max_level(level.to_level_filter());
    }
}
