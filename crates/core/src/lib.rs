pub mod config;
pub mod error;
pub mod manifest;
pub mod retry;
pub mod shutdown;
pub mod types;

pub use error::CoreError;

pub type Result<T> = std::result::Result<T, CoreError>;
