use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use porter_core::config::{SchedulerPodConfig, ScratchConfig};
use porter_core::types::{DagSnapshot, RunConfig};
use porter_core::{CoreError, Result};

use crate::client::SchedulerClient;

/// Lifecycle phase of the scheduler pod as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Missing,
    Waiting,
    Running,
    Terminated,
}

/// The slice of the Kubernetes API the bring-up protocol consumes. The
/// concrete client lives outside this subsystem; implementations map their
/// pod model onto `PodPhase` and error on states they cannot classify.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn pod_phase(&self, name: &str) -> Result<PodPhase>;
    async fn create_pod(&self, pod: &SchedulerPodConfig, env: &[(String, String)]) -> Result<()>;
    async fn delete_pod(&self, name: &str) -> Result<()>;
    async fn pod_ip(&self, name: &str) -> Result<Option<String>>;
    async fn create_daemonset(&self, scratch: &ScratchConfig) -> Result<()>;

    /// In-cluster DNS URL of a pod. The default follows the standard
    /// `pod.cluster.local` convention with dots replaced by dashes.
    fn pod_dns_url(&self, ip: &str, namespace: &str, port: u16) -> String {
        format!(
            "http://{}.{}.pod.cluster.local:{}",
            ip.replace('.', "-"),
            namespace,
            port
        )
    }
}

impl SchedulerClient {
    /// Idempotent bring-up: make sure a scheduler pod exists and is running,
    /// register this run against it, then push the current DAG snapshot.
    /// Subsequent calls return immediately.
    pub async fn ensure_registered(
        &self,
        cluster: &dyn ClusterOps,
        pod: &SchedulerPodConfig,
        dag: &DagSnapshot,
    ) -> Result<()> {
        {
            let mut registered = self.registered.lock().await;
            if *registered {
                return Ok(());
            }

            match cluster.pod_phase(&pod.name).await? {
                PodPhase::Terminated => {
                    info!("Scheduler pod {} terminated, recreating", pod.name);
                    cluster.delete_pod(&pod.name).await?;
                    self.spawn_pod(cluster, pod).await?;
                }
                PodPhase::Missing => {
                    info!("Creating scheduler pod {}", pod.name);
                    self.spawn_pod(cluster, pod).await?;
                }
                PodPhase::Running | PodPhase::Waiting => {
                    info!("Reusing scheduler pod {}", pod.name);
                }
            }

            let interval = Duration::from_millis(self.config.pod_poll_interval_ms);
            loop {
                match cluster.pod_phase(&pod.name).await? {
                    PodPhase::Waiting => tokio::time::sleep(interval).await,
                    PodPhase::Running => break,
                    other => {
                        return Err(CoreError::Config(format!(
                            "scheduler pod {} entered {:?} during startup",
                            pod.name, other
                        )))
                    }
                }
            }

            let ip = loop {
                match cluster.pod_ip(&pod.name).await? {
                    Some(ip) => break ip,
                    None => tokio::time::sleep(interval).await,
                }
            };
            let url = cluster.pod_dns_url(&ip, &self.namespace, self.config.port);
            info!("Scheduler reachable at {}", url);
            self.set_endpoint(url);

            self.register_with_retry().await?;
            *registered = true;
        }

        // The DAG built so far goes out immediately after registration.
        self.inform_dag_change(dag).await
    }

    async fn spawn_pod(
        &self,
        cluster: &dyn ClusterOps,
        pod: &SchedulerPodConfig,
    ) -> Result<()> {
        let env = vec![
            ("SCHEDULER_NAME".to_string(), pod.name.clone()),
            ("AUTOCLOSE".to_string(), pod.autoclose.to_string()),
        ];
        cluster.create_pod(pod, &env).await
    }

    /// A freshly created pod may not be accepting connections yet: refused
    /// connections are retried on the registration policy, anything else is
    /// fatal immediately.
    async fn register_with_retry(&self) -> Result<()> {
        let run = RunConfig {
            run_name: self.run_name.clone(),
            namespace: self.namespace.clone(),
            strategy: self.config.strategy.clone(),
            batch_size: self.config.batch_size,
            dns: self.engine_dns.clone(),
            cost_function: self.config.cost_function.clone(),
            additional: self.config.additional.clone(),
        };
        let policy = self.config.registration;
        let mut attempt: u32 = 0;
        loop {
            match self.register_scheduler(&run).await {
                Ok(()) => return Ok(()),
                Err(CoreError::Connect(message)) => {
                    attempt += 1;
                    if attempt >= policy.max_attempts {
                        return Err(CoreError::Connect(message));
                    }
                    warn!(
                        "Scheduler not accepting connections yet (attempt {}/{}): {}",
                        attempt, policy.max_attempts, message
                    );
                    tokio::time::sleep(policy.backoff(attempt - 1)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
