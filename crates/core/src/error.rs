use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("manifest parse error: {0}")]
    Parse(String),

    #[error("scheduler host could not be resolved: {0}")]
    UnknownHost(String),

    #[error("scheduler returned HTTP {status} for {op}")]
    Remote { op: &'static str, status: u16 },

    /// Refused connection; the one transport failure worth retrying.
    #[error("connection refused: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("FTP transfer failed: {0}")]
    Ftp(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled by shutdown")]
    Cancelled,
}

/// Walk an error's source chain looking for a refused TCP connection.
/// Registration retries on exactly this condition; everything else is fatal.
pub fn is_connection_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = e.source();
    }
    false
}
