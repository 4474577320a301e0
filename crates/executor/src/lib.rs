pub mod bridge;
pub mod wrapper;

pub use bridge::ExecutorBridge;
