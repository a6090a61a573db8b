//! Transcript log files for completion traffic.
//!
//! Separate from the `log` facade: these files hold the raw request and
//! response text for one backend, one `[ts] DIRECTION: data` line each.

use chrono::{SecondsFormat, Utc};
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

/// Thread-safe handle to an append-only log file. `None` disables logging.
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// A handle that discards everything.
pub fn disabled() -> LogHandle {
    Arc::new(Mutex::new(None))
}

/// Write a timestamped line to the log file (if present).
pub fn log_line(handle: &LogHandle, direction: &str, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            let _ = writeln!(file, "[{}] {}: {}", ts, direction, data);
            let _ = file.flush();
        }
    }
}

/// Open (or create) `{log_dir}/{log_id}.log` and return a shared handle.
///
/// Failure to create the file yields a disabled handle rather than an error.
pub fn open_log_file(log_dir: Option<&Path>, log_id: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::warn!("Cannot create log dir {}: {}", dir.display(), e);
            return None;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{}.log", log_id)))
            .map_err(|e| log::warn!("Cannot open {} log: {}", log_id, e))
            .ok()
    });
    Arc::new(Mutex::new(file))
}
