// src/io/error.rs
//
// Error type for the device link.

/// Errors surfaced by the device link to its callers.
///
/// Malformed input never shows up here: the parser degrades bad lines into
/// generic packets, and read-side I/O errors are retried on the reader thread.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Failed to enumerate ports: {0}")]
    Enumerate(#[source] serialport::Error),

    #[error("Invalid serial settings: {0}")]
    Config(String),

    #[error("Failed to start reader thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Serial write error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Link is closed")]
    Closed,
}

impl LinkError {
    pub(crate) fn open(port: &str, source: serialport::Error) -> Self {
        LinkError::Open {
            port: port.to_string(),
            source,
        }
    }
}
