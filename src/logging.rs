use std::io::Write;
use std::sync::OnceLock;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Environment variable holding the log level (`error`, `warn`, `info`,
/// `debug`, `trace` or `off`).
pub const LOG_ENV: &str = "CUBE_LOG";

const F_COL_LIGHT_BLUE: &str = "\x1b[2;34m";
const F_RESET: &str = "\x1b[0m";

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Writes `(cube:<pid>): <target>-<LEVEL> **: <time>: <message>` lines to
/// stderr.
pub struct Logger {
    pid: u32,
    level: LevelFilter,
}

impl Logger {
    /// Installs the logger. `verbosity` (number of `-v` flags) raises the
    /// level above whatever `CUBE_LOG` sets.
    pub fn init(verbosity: u8) {
        let from_env = std::env::var(LOG_ENV)
            .ok()
            .and_then(|value| value.parse::<LevelFilter>().ok())
            .unwrap_or(LevelFilter::Warn);
        let from_flags = match verbosity {
            0 => LevelFilter::Off,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };
        let level = from_env.max(from_flags);

        let logger = LOGGER.get_or_init(|| Logger {
            pid: std::process::id(),
            level,
        });
        if log::set_logger(logger).is_ok() {
            log::set_max_level(logger.level);
        }
    }

    const fn level_to_color(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1b[1;31m", /* red */
            Level::Warn => "\x1b[1;33m",  /* yellow */
            Level::Info => "\x1b[1;32m",  /* green */
            Level::Debug => "\x1b[1;32m", /* green */
            Level::Trace => "\x1b[1;35m", /* magenta */
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let secs_of_day = since_epoch.as_secs() % 86_400;

        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "(cube:{}): {}-{}{}{} **: {}{:02}:{:02}:{:02}.{:03}{}: {}",
            self.pid,
            record.target(),
            Self::level_to_color(record.level()),
            record.level().as_str(),
            F_RESET,
            F_COL_LIGHT_BLUE,
            secs_of_day / 3600,
            (secs_of_day / 60) % 60,
            secs_of_day % 60,
            since_epoch.subsec_millis(),
            F_RESET,
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}
