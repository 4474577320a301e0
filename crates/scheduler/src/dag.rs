use tracing::debug;

use porter_core::types::{DagEdge, DagSnapshot, DagVertex};
use porter_core::Result;

use crate::client::SchedulerClient;

/// How far into the vertex list previous submissions got. Vertices are
/// append-only, so a single counter identifies the unsubmitted tail.
#[derive(Debug, Default)]
pub(crate) struct DagProgress {
    pub submitted: usize,
}

impl SchedulerClient {
    /// Push the DAG's growth since the last call: the new vertices, then the
    /// edges incident to any of them. Serialised by the DAG mutex so
    /// concurrent callers produce one ordered stream and no vertex is ever
    /// sent twice.
    pub async fn inform_dag_change(&self, dag: &DagSnapshot) -> Result<()> {
        let mut progress = self.dag.lock().await;
        if dag.vertices.len() <= progress.submitted {
            return Ok(());
        }
        let fresh = &dag.vertices[progress.submitted..];
        let edges: Vec<DagEdge> = dag
            .edges
            .iter()
            .filter(|e| e.incident_to(fresh))
            .cloned()
            .collect();
        debug!(
            "Submitting {} new DAG vertices and {} edges",
            fresh.len(),
            edges.len()
        );
        self.add_vertices(fresh).await?;
        if !edges.is_empty() {
            self.add_edges(&edges).await?;
        }
        progress.submitted = dag.vertices.len();
        Ok(())
    }

    async fn add_vertices(&self, vertices: &[DagVertex]) -> Result<()> {
        let url = self.url(&format!(
            "/scheduler/DAG/addVertices/{}/{}",
            self.namespace, self.run_name
        ))?;
        let response = self
            .http
            .put(url)
            .json(&vertices)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        Self::expect_ok("addVertices", &response)
    }

    async fn add_edges(&self, edges: &[DagEdge]) -> Result<()> {
        let url = self.url(&format!(
            "/scheduler/DAG/addEdges/{}/{}",
            self.namespace, self.run_name
        ))?;
        let response = self
            .http
            .put(url)
            .json(&edges)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        Self::expect_ok("addEdges", &response)
    }
}
