//! Per-session file logger.
//!
//! `init` opens a single log file under the platform data directory and
//! truncates it, so the file only ever holds output from the most recent
//! session:
//!
//!   Windows:  `%APPDATA%\Artboard\artboard.log`
//!   macOS:    `~/Library/Application Support/Artboard/artboard.log`
//!   Linux:    `$XDG_DATA_HOME` (or `~/.local/share`) `/Artboard/artboard.log`
//!
//! The rest of the crate logs through the `log_info!` / `log_warn!` /
//! `log_err!` macros. A panic hook mirrors panic messages into the log before
//! the default handler runs. I/O errors are swallowed everywhere here; the
//! editor must keep running without a log sink, and calls made before `init`
//! are simply dropped.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();

/// Append one timestamped, level-tagged line to the session log.
pub fn write(level: &str, msg: &str) {
    if let Some(mutex) = LOG_FILE.get()
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "[{}] [{}] {}", clock(), level, msg);
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write("INFO", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write("WARN", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write("ERROR", &format!($($arg)*));
    };
}

/// Open (or truncate) the session log and install the panic hook.
/// Called once from `main` before the UI starts.
pub fn init() {
    let path = log_file_path();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file = match OpenOptions::new().create(true).write(true).truncate(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("[logger] cannot open {:?}: {}", path, e);
            return;
        }
    };
    let _ = LOG_FILE.set(Mutex::new(file));
    write("INFO", &format!("session started, logging to {}", path.display()));

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write("PANIC", &info.to_string());
        prev(info);
    }));
}

fn log_file_path() -> PathBuf {
    data_dir().join("Artboard").join("artboard.log")
}

/// Platform data directory, without the app sub-folder.
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

/// Wall-clock HH:MM:SS derived from the unix epoch. Date-free on purpose:
/// the log never outlives a session.
fn clock() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            let secs = d.as_secs();
            format!("{:02}:{:02}:{:02}", (secs % 86400) / 3600, (secs % 3600) / 60, secs % 60)
        }
        Err(_) => "??:??:??".to_string(),
    }
}
