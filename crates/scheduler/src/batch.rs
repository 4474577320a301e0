use tracing::trace;

use porter_core::Result;

use crate::client::SchedulerClient;

/// Submission counter for the current batch.
/// Invariant: `0 <= tasks_in_batch <= batch_size` between calls.
#[derive(Debug, Default)]
pub(crate) struct BatchState {
    pub tasks_in_batch: usize,
}

impl SchedulerClient {
    /// Open a batch. No-op after `close`.
    pub async fn start_batch(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let mut batch = self.batch.lock().await;
        self.post_start_batch().await?;
        batch.tasks_in_batch = 0;
        Ok(())
    }

    /// Account one task submission. Rolls the batch over once it is full:
    /// the running batch is closed with `batch_size` tasks and a new one is
    /// opened holding this submission.
    pub async fn start_submit(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let mut batch = self.batch.lock().await;
        batch.tasks_in_batch += 1;
        if batch.tasks_in_batch > self.config.batch_size {
            self.post_end_batch(self.config.batch_size).await?;
            self.post_start_batch().await?;
            batch.tasks_in_batch = 1;
        }
        trace!("Batch now holds {} tasks", batch.tasks_in_batch);
        Ok(())
    }

    /// Flush the running batch.
    pub async fn end_batch(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let mut batch = self.batch.lock().await;
        self.post_end_batch(batch.tasks_in_batch).await?;
        batch.tasks_in_batch = 0;
        Ok(())
    }

    async fn post_start_batch(&self) -> Result<()> {
        let url = self.url(&format!(
            "/scheduler/startBatch/{}/{}",
            self.namespace, self.run_name
        ))?;
        let response = self
            .http
            .post(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        Self::expect_ok("startBatch", &response)
    }

    async fn post_end_batch(&self, task_count: usize) -> Result<()> {
        let url = self.url(&format!(
            "/scheduler/endBatch/{}/{}",
            self.namespace, self.run_name
        ))?;
        let response = self
            .http
            .post(url)
            .body(task_count.to_string())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        Self::expect_ok("endBatch", &response)
    }
}
