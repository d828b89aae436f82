//! A simple logging utility for emitting messages based on severity levels.
//!
//! Messages below the current maximum level (see [set_max_level]) are
//! discarded before they are formatted.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time;

/// Source of the log message.
const SOURCE: &str = "boot-tcp";

#[cfg(debug_assertions)]
static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Debug as u8);

#[cfg(not(debug_assertions))]
static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Warn as u8);

/// Logs a message at the [Level::Error] level.
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {{
        if $crate::log::enabled($crate::log::Level::Error) {
            $crate::log::log($crate::log::Level::Error, format!($($arg)+));
        }
    }};
}

/// Logs a message at the [Level::Warn] level.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {{
        if $crate::log::enabled($crate::log::Level::Warn) {
            $crate::log::log($crate::log::Level::Warn, format!($($arg)+));
        }
    }};
}

/// Logs a message at the [Level::Info] level.
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {{
        if $crate::log::enabled($crate::log::Level::Info) {
            $crate::log::log($crate::log::Level::Info, format!($($arg)+));
        }
    }};
}

/// Logs a message at the [Level::Debug] level.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {{
        if $crate::log::enabled($crate::log::Level::Debug) {
            $crate::log::log($crate::log::Level::Debug, format!($($arg)+));
        }
    }};
}

/// Severity levels for log messages, ordered from most to least severe.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Designates very serious errors.
    Error = 1,
    /// Designates hazardous situations.
    Warn = 2,
    /// Designates useful information.
    Info = 3,
    /// Designates lower priority information.
    Debug = 4,
}

impl Level {
    fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(Level::Error),
            2 => Some(Level::Warn),
            3 => Some(Level::Info),
            4 => Some(Level::Debug),
            _ => None,
        }
    }
}

/// Sets the most verbose level that will be emitted. `None` silences all
/// output.
pub fn set_max_level(level: Option<Level>) {
    MAX_LEVEL.store(level.map_or(0, |l| l as u8), Ordering::Relaxed);
}

/// Returns the most verbose level currently emitted, if any.
pub fn max_level() -> Option<Level> {
    Level::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

/// Returns `true` if messages at `level` are currently emitted.
#[inline]
pub fn enabled(level: Level) -> bool {
    level as u8 <= MAX_LEVEL.load(Ordering::Relaxed)
}

/// Logs a message with the specified severity level.
///
/// - [Level::Info] and [Level::Debug] messages are printed to `stdout`.
/// - [Level::Warn] and [Level::Error] messages are printed to `stderr`.
///
/// The log message will include a timestamp, severity level, and the source of
/// the log (`boot-tcp`).
pub fn log(level: Level, msg: impl std::fmt::Display) {
    let timestamp = local_timestamp();

    match level {
        Level::Error => {
            eprintln!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;31mERROR\x1b[0m [\x1b[1;37m{SOURCE}\x1b[0m] {msg}"
            );
        }
        Level::Warn => {
            eprintln!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;33mWARN \x1b[0m [\x1b[1;37m{SOURCE}\x1b[0m] {msg}"
            );
        }
        Level::Info => {
            println!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;32mINFO \x1b[0m [\x1b[1;37m{SOURCE}\x1b[0m] {msg}"
            );
        }
        Level::Debug => {
            println!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;34mDEBUG\x1b[0m [\x1b[1;37m{SOURCE}\x1b[0m] {msg}"
            );
        }
    }
}

/// Formats the current wall-clock time in the local timezone, or `UNKNOWN`
/// if the conversion fails (no timezone data is common during early boot).
fn local_timestamp() -> String {
    let now = time::SystemTime::now()
        .duration_since(time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as libc::time_t;

    // SAFETY: `tm` is plain old data; all-zero is a valid bit pattern.
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };

    // SAFETY: both pointers are valid for the duration of the call and
    // `localtime_r` does not retain them.
    let res = unsafe { libc::localtime_r(&now, &mut tm) };

    if res.is_null() {
        return "UNKNOWN".to_string();
    }

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    )
}
