pub mod batch;
pub mod bringup;
pub mod client;
pub mod dag;

#[cfg(test)]
pub(crate) mod tests_common;

pub use bringup::{ClusterOps, PodPhase};
pub use client::SchedulerClient;
