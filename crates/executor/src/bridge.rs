use std::future::Future;
use std::sync::{Arc, OnceLock};

use tracing::{info, warn};

use porter_core::config::{LocalityConfig, ScratchConfig};
use porter_core::shutdown::{shutdown_pair, ShutdownHandle, ShutdownSignal};
use porter_core::types::DagSnapshot;
use porter_core::{CoreError, Result};
use porter_locality::{client_bound_factory, LocalFileWalker, LocalPathFactory, LocationSource};
use porter_scheduler::{ClusterOps, SchedulerClient};

/// Wires the executor's lifecycle hooks to the locality subsystem: one
/// shared scheduler client, the walker factory bound to it, batch
/// boundaries around the submission poll, and shutdown.
pub struct ExecutorBridge {
    client: OnceLock<Arc<SchedulerClient>>,
    locality: LocalityConfig,
    shutdown_handle: ShutdownHandle,
    shutdown: ShutdownSignal,
}

impl ExecutorBridge {
    pub fn new(locality: LocalityConfig) -> Self {
        let (shutdown_handle, shutdown) = shutdown_pair();
        Self {
            client: OnceLock::new(),
            locality,
            shutdown_handle,
            shutdown,
        }
    }

    /// Install the run's scheduler client. Installed once at startup; later
    /// calls are ignored.
    pub fn set_scheduler_client(&self, client: Arc<SchedulerClient>) {
        if self.client.set(client).is_err() {
            warn!("Scheduler client already installed, keeping the first one");
        }
    }

    pub fn client(&self) -> Option<Arc<SchedulerClient>> {
        self.client.get().cloned()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    fn installed_client(&self) -> Result<Arc<SchedulerClient>> {
        self.client()
            .ok_or_else(|| CoreError::Config("scheduler client not installed".into()))
    }

    /// The factory `LocalFileWalker` is parameterised with: every produced
    /// path holds a non-owning reference back to the installed client.
    pub fn local_path_factory(&self) -> Result<LocalPathFactory> {
        let client: Arc<dyn LocationSource> = self.installed_client()?;
        Ok(client_bound_factory(
            &client,
            self.locality.clone(),
            self.shutdown.clone(),
        ))
    }

    pub fn walker(&self) -> Result<LocalFileWalker> {
        Ok(LocalFileWalker::new(self.local_path_factory()?))
    }

    pub async fn inform_dag_change(&self, dag: &DagSnapshot) -> Result<()> {
        self.installed_client()?.inform_dag_change(dag).await
    }

    /// Create the per-node scratch DaemonSet exposing node-local storage.
    pub async fn ensure_scratch(
        &self,
        cluster: &dyn ClusterOps,
        scratch: &ScratchConfig,
    ) -> Result<()> {
        info!("Ensuring scratch DaemonSet {}", scratch.daemonset_name);
        cluster.create_daemonset(scratch).await
    }

    /// Run one submission poll: open a batch, account every task through the
    /// client's batch counter, flush at the end.
    pub async fn submit_all<T, F, Fut>(
        &self,
        tasks: impl IntoIterator<Item = T>,
        mut submit: F,
    ) -> Result<()>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let client = self.installed_client()?;
        client.start_batch().await?;
        for task in tasks {
            client.start_submit().await?;
            submit(task).await?;
        }
        client.end_batch().await
    }

    /// Flip the process-wide shutdown signal and close the run on the
    /// scheduler.
    pub async fn shutdown(&self) {
        self.shutdown_handle.trigger();
        if let Some(client) = self.client() {
            client.close().await;
        }
    }
}
