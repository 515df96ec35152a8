// src/logging.rs
//
// Timestamped stderr logging shared by the library and the CLI.

/// Local wall-clock prefix used by `tlog!`.
pub fn timestamp_prefix() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {{
        eprintln!("{} {}", $crate::logging::timestamp_prefix(), format_args!($($arg)*));
    }};
}
