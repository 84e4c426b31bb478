// src/logging.rs
//
// Diagnostic logging for the extcap bridge.
// Wireshark owns stdout, so diagnostics go either to a log file under
// EXTCAP_LOC or to stderr. Components receive a `Logger` handle at
// construction instead of reaching for a global.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Name of the diagnostic log file inside the EXTCAP_LOC directory.
pub const LOG_FILE_NAME: &str = "silabs-pti.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

enum Sink {
    File(File),
    Stderr,
    #[cfg_attr(not(test), allow(dead_code))]
    Capture(Vec<String>),
}

/// Cloneable handle to the diagnostic log destination.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<Mutex<Sink>>,
}

impl Logger {
    /// Log to stderr.
    pub fn stderr() -> Self {
        Self::with_sink(Sink::Stderr)
    }

    /// Open (or create) `silabs-pti.log` in `dir` in append mode.
    pub fn to_file(dir: &Path) -> Result<Self, String> {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create log dir {}: {}", dir.display(), e))?;

        let log_path = dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| format!("Failed to open log file {}: {}", log_path.display(), e))?;

        Ok(Self::with_sink(Sink::File(file)))
    }

    /// Pick the destination from the EXTCAP_LOC directory, if any.
    /// A log file that cannot be opened falls back to stderr.
    pub fn for_location(location: Option<&Path>) -> Self {
        match location {
            Some(dir) => match Self::to_file(dir) {
                Ok(logger) => logger,
                Err(e) => {
                    let logger = Self::stderr();
                    logger.log(
                        Severity::Warning,
                        format_args!("[logging] {}, logging to stderr", e),
                    );
                    logger
                }
            },
            None => Self::stderr(),
        }
    }

    /// In-memory logger for tests.
    #[cfg(test)]
    pub fn capture() -> Self {
        Self::with_sink(Sink::Capture(Vec::new()))
    }

    /// Lines written to a capture logger so far.
    #[cfg(test)]
    pub fn captured(&self) -> Vec<String> {
        match self.sink.lock() {
            Ok(guard) => match &*guard {
                Sink::Capture(lines) => lines.clone(),
                _ => Vec::new(),
            },
            Err(_) => Vec::new(),
        }
    }

    fn with_sink(sink: Sink) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Write one timestamped line. Failures to write diagnostics are ignored.
    pub fn log(&self, severity: Severity, args: fmt::Arguments<'_>) {
        let line = format!(
            "{}: [{}] {}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%z"),
            severity.label(),
            args
        );
        if let Ok(mut guard) = self.sink.lock() {
            match &mut *guard {
                Sink::File(f) => {
                    let _ = writeln!(f, "{}", line);
                    let _ = f.flush();
                }
                Sink::Stderr => eprintln!("{}", line),
                Sink::Capture(lines) => lines.push(line),
            }
        }
    }
}

/// Timestamped informational log line: `tlog!(logger, "fmt", args..)`.
macro_rules! tlog {
    ($log:expr, $($arg:tt)*) => {
        $log.log($crate::logging::Severity::Info, format_args!($($arg)*))
    };
}

/// Timestamped warning.
macro_rules! twarn {
    ($log:expr, $($arg:tt)*) => {
        $log.log($crate::logging::Severity::Warning, format_args!($($arg)*))
    };
}

/// Timestamped error.
macro_rules! terror {
    ($log:expr, $($arg:tt)*) => {
        $log.log($crate::logging::Severity::Error, format_args!($($arg)*))
    };
}
