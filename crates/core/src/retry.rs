use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shared retry policy for the scheduler bring-up and FTP paths.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub factor: f64,
}

impl RetryConfig {
    /// Registration against a freshly created scheduler pod: flat 3 s pauses,
    /// up to 50 attempts.
    pub fn registration() -> Self {
        Self {
            max_attempts: 50,
            initial_backoff_ms: 3000,
            factor: 1.0,
        }
    }

    /// FTP transfers: 2^trial ms, up to 6 attempts.
    pub fn ftp() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff_ms: 1,
            factor: 2.0,
        }
    }

    /// Pause before retrying after the given zero-based attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let millis = self.initial_backoff_ms as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(millis as u64)
    }
}
