use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Scheduling strategy announced to the remote scheduler.
    pub strategy: String,
    pub batch_size: usize,
    /// Port the scheduler pod listens on.
    pub port: u16,
    pub http_timeout_secs: u64,
    /// Poll interval while waiting for the scheduler pod to leave `waiting`.
    pub pod_poll_interval_ms: u64,
    pub registration: RetryConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_function: Option<String>,
    #[serde(default)]
    pub additional: HashMap<String, String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: "fifo-fair".to_string(),
            batch_size: 10,
            port: 8080,
            http_timeout_secs: 90,
            pod_poll_interval_ms: 100,
            registration: RetryConfig::registration(),
            cost_function: None,
            additional: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalityConfig {
    pub ftp_user: String,
    pub ftp_password: String,
    pub ftp: RetryConfig,
    pub ftp_timeout_secs: u64,
    /// Chunk size for download-on-write copies.
    pub download_chunk_bytes: usize,
}

impl Default for LocalityConfig {
    fn default() -> Self {
        Self {
            ftp_user: "ftp".to_string(),
            ftp_password: "nextflowClient".to_string(),
            ftp: RetryConfig::ftp(),
            ftp_timeout_secs: 60,
            download_chunk_bytes: 8 * 1024,
        }
    }
}

/// A host directory mounted into the scheduler pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMount {
    pub host_path: PathBuf,
    pub mount_path: PathBuf,
}

/// A persistent volume claim mounted into the scheduler pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeClaimMount {
    pub claim_name: String,
    pub mount_path: PathBuf,
}

/// Template for the scheduler pod, handed to the external Kubernetes client
/// when bring-up has to create one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerPodConfig {
    pub name: String,
    pub image: String,
    pub cpus: u32,
    pub memory_mib: u64,
    pub image_pull_policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default)]
    pub host_mounts: Vec<HostMount>,
    #[serde(default)]
    pub volume_claims: Vec<VolumeClaimMount>,
    #[serde(default)]
    pub node_selector: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
    /// When set the scheduler exits once the run is closed.
    pub autoclose: bool,
}

impl Default for SchedulerPodConfig {
    fn default() -> Self {
        Self {
            name: "workflow-scheduler".to_string(),
            image: "porter/scheduler:latest".to_string(),
            cpus: 1,
            memory_mib: 1400,
            image_pull_policy: "IfNotPresent".to_string(),
            service_account: None,
            host_mounts: Vec::new(),
            volume_claims: Vec::new(),
            node_selector: HashMap::new(),
            run_as_user: None,
            autoclose: true,
        }
    }
}

/// Template for the per-node scratch DaemonSet that exposes node-local
/// storage over FTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchConfig {
    pub daemonset_name: String,
    pub image: String,
    /// Node-local root under which every task's scratch lives.
    pub scratch_root: PathBuf,
    pub ftp_port: u16,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            daemonset_name: "porter-scratch".to_string(),
            image: "porter/daemon:latest".to_string(),
            scratch_root: PathBuf::from("/scratch"),
            ftp_port: 21,
        }
    }
}

/// Top-level configuration aggregating all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PorterConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub locality: LocalityConfig,
    #[serde(default)]
    pub pod: SchedulerPodConfig,
    #[serde(default)]
    pub scratch: ScratchConfig,
}

/// Load configuration from a TOML file.
/// Falls back to defaults if the file doesn't exist.
pub fn load_config(path: &str) -> PorterConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("Failed to parse config {}: {}, using defaults", path, e);
                PorterConfig::default()
            }
        },
        Err(_) => {
            tracing::debug!("Config file {} not found, using defaults", path);
            PorterConfig::default()
        }
    }
}

/// Save configuration to a TOML file.
/// Creates parent directories if they don't exist.
pub fn save_config(config: &PorterConfig, path: &str) -> anyhow::Result<()> {
    let path = std::path::Path::new(path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    tracing::info!("Config saved to {:?}", path);
    Ok(())
}
