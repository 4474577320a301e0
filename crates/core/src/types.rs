use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Opaque token issued with a file location; echoed back on updates so the
/// remote scheduler can reject stale writes.
pub type LocationWrapperId = i64;

/// One symlink the owning node expects to exist next to the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkSpec {
    pub src: PathBuf,
    pub dst: PathBuf,
}

/// Where a file currently lives, as answered by the remote scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLocation {
    pub path: PathBuf,
    pub node: String,
    pub daemon: String,
    pub same_as_engine: bool,
    pub location_wrapper_id: LocationWrapperId,
    #[serde(default)]
    pub symlinks: Vec<SymlinkSpec>,
}

/// Update reported back after a local materialisation or mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLocationUpdate {
    pub path: PathBuf,
    pub size: u64,
    pub timestamp: i64,
    pub location_wrapper_id: LocationWrapperId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagVertex {
    pub label: String,
    #[serde(rename = "type")]
    pub vertex_type: String,
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagEdge {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub from_uid: String,
    pub to_uid: String,
}

impl DagEdge {
    /// True when either endpoint is one of the given vertices.
    pub fn incident_to(&self, vertices: &[DagVertex]) -> bool {
        vertices
            .iter()
            .any(|v| v.uid == self.from_uid || v.uid == self.to_uid)
    }
}

/// Immutable view of the workflow DAG at a point in time. Vertices only ever
/// get appended; a submitted vertex never changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DagSnapshot {
    pub vertices: Vec<DagVertex>,
    pub edges: Vec<DagEdge>,
}

/// An input file a task declared, with the path it was staged from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    pub name: String,
    pub storage_path: PathBuf,
}

/// Task registration payload sent to the remote scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub run_name: String,
    pub task_name: String,
    pub scheduler_name: String,
    pub cpus: u32,
    pub memory_mib: u64,
    pub work_dir: PathBuf,
    #[serde(default)]
    pub input_files: Vec<InputFile>,
    #[serde(default)]
    pub output_patterns: Vec<String>,
}

/// Handle returned by `registerTask`; its id keys later state queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: i64,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub state: String,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self.state.as_str(), "FINISHED" | "FINISHED_WITH_ERROR")
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.node, self.exit_code) {
            (Some(node), Some(code)) => write!(f, "{} on {} (exit {})", self.state, node, code),
            (Some(node), None) => write!(f, "{} on {}", self.state, node),
            _ => write!(f, "{}", self.state),
        }
    }
}

/// Run-level scheduling parameters posted by `registerScheduler`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub run_name: String,
    pub namespace: String,
    pub strategy: String,
    pub batch_size: usize,
    /// DNS base URL under which the workflow engine itself is reachable.
    pub dns: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_function: Option<String>,
    #[serde(default)]
    pub additional: HashMap<String, String>,
}
