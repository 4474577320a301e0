use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use porter_core::config::SchedulerConfig;
use porter_core::error::is_connection_refused;
use porter_core::types::{
    FileLocation, FileLocationUpdate, TaskConfig, TaskHandle, TaskState,
};
use porter_core::{CoreError, Result};
use porter_locality::LocationSource;

use crate::batch::BatchState;
use crate::dag::DagProgress;

/// HTTP/JSON client against the in-cluster scheduler pod.
///
/// One instance is shared by the whole workflow process; every operation is
/// safe under concurrent invocation. The endpoint is fixed once by bring-up
/// (or `set_endpoint`), after which requests go out without further locking.
pub struct SchedulerClient {
    pub(crate) http: reqwest::Client,
    pub(crate) namespace: String,
    pub(crate) run_name: String,
    /// DNS base URL under which this workflow engine is reachable; announced
    /// to the scheduler at registration.
    pub(crate) engine_dns: String,
    pub(crate) config: SchedulerConfig,
    pub(crate) base_url: OnceLock<String>,
    pub(crate) registered: Mutex<bool>,
    pub(crate) closed: AtomicBool,
    pub(crate) dag: Mutex<DagProgress>,
    pub(crate) batch: Mutex<BatchState>,
    daemons: std::sync::Mutex<HashMap<String, String>>,
}

impl SchedulerClient {
    pub fn new(
        namespace: impl Into<String>,
        run_name: impl Into<String>,
        engine_dns: impl Into<String>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            namespace: namespace.into(),
            run_name: run_name.into(),
            engine_dns: engine_dns.into(),
            config,
            base_url: OnceLock::new(),
            registered: Mutex::new(false),
            closed: AtomicBool::new(false),
            dag: Mutex::new(DagProgress::default()),
            batch: Mutex::new(BatchState::default()),
            daemons: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Point the client at an already-running scheduler. Bring-up calls this
    /// with the pod DNS URL; later calls are ignored.
    pub fn set_endpoint(&self, url: impl Into<String>) {
        let _ = self.base_url.set(url.into());
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn endpoint(&self) -> Result<&str> {
        self.base_url
            .get()
            .map(String::as_str)
            .ok_or_else(|| CoreError::Config("scheduler endpoint not resolved yet".into()))
    }

    pub(crate) fn url(&self, suffix: &str) -> Result<String> {
        Ok(format!("{}{}", self.endpoint()?, suffix))
    }

    /// Map a transport-level failure onto the error taxonomy: refused
    /// connections are retryable, unresolvable hosts carry their own message,
    /// everything else is fatal.
    pub(crate) fn transport_error(&self, err: reqwest::Error) -> CoreError {
        if is_connection_refused(&err) {
            CoreError::Connect(err.to_string())
        } else if err.is_timeout() {
            CoreError::Timeout(Duration::from_secs(self.config.http_timeout_secs))
        } else if is_unknown_host(&err) {
            CoreError::UnknownHost(err.to_string())
        } else {
            CoreError::Transport(err.to_string())
        }
    }

    pub(crate) fn expect_ok(op: &'static str, response: &reqwest::Response) -> Result<()> {
        if response.status() != StatusCode::OK {
            return Err(CoreError::Remote {
                op,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    // --- Run lifecycle ---

    pub async fn register_scheduler(&self, run: &porter_core::types::RunConfig) -> Result<()> {
        let url = self.url(&format!(
            "/scheduler/registerScheduler/{}/{}/{}",
            self.namespace, self.run_name, run.strategy
        ))?;
        let response = self
            .http
            .put(url)
            .json(run)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        Self::expect_ok("registerScheduler", &response)?;
        debug!("Registered run {} with scheduler", self.run_name);
        Ok(())
    }

    /// Tear the run down on the scheduler. Best-effort: the response code is
    /// ignored and transport failures only logged. All batch traffic after
    /// this call is silently dropped.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let url = match self.url(&format!("/scheduler/{}/{}", self.namespace, self.run_name)) {
            Ok(url) => url,
            Err(_) => return,
        };
        match self.http.delete(url).send().await {
            Ok(response) => debug!("Scheduler close returned {}", response.status()),
            Err(e) => warn!("Scheduler close failed: {}", e),
        }
    }

    // --- Tasks ---

    pub async fn register_task(&self, task: &TaskConfig) -> Result<TaskHandle> {
        let url = self.url(&format!(
            "/scheduler/registerTask/{}/{}",
            self.namespace, self.run_name
        ))?;
        let response = self
            .http
            .put(url)
            .json(task)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        Self::expect_ok("registerTask", &response)?;
        Ok(response.json().await.map_err(|e| self.transport_error(e))?)
    }

    pub async fn task_state(&self, id: i64) -> Result<TaskState> {
        let url = self.url(&format!(
            "/scheduler/taskstate/{}/{}/{}",
            self.namespace, self.run_name, id
        ))?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        Self::expect_ok("getTaskState", &response)?;
        Ok(response.json().await.map_err(|e| self.transport_error(e))?)
    }

    // --- File locations ---

    pub async fn get_file_location(&self, path: &Path) -> Result<FileLocation> {
        let url = self.url(&format!(
            "/file/{}/{}?path={}",
            self.namespace,
            self.run_name,
            urlencoding::encode(&path.to_string_lossy())
        ))?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        Self::expect_ok("getFileLocation", &response)?;
        Ok(response.json().await.map_err(|e| self.transport_error(e))?)
    }

    pub async fn add_file_location(
        &self,
        update: &FileLocationUpdate,
        overwrite: bool,
    ) -> Result<()> {
        let verb = if overwrite { "overwrite" } else { "add" };
        let mut suffix = format!(
            "/file/location/{}/{}/{}",
            verb, self.namespace, self.run_name
        );
        if let Some(node) = &update.node {
            suffix.push('/');
            suffix.push_str(node);
        }
        let url = self.url(&suffix)?;
        let response = self
            .http
            .post(url)
            .json(update)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        Self::expect_ok("addFileLocation", &response)
    }

    /// Resolve the FTP daemon serving a node's scratch. Answers are cached
    /// until `drop_cached_daemon` invalidates them.
    pub async fn daemon_address(&self, node: &str) -> Result<String> {
        if let Some(address) = self.daemons.lock().unwrap().get(node) {
            return Ok(address.clone());
        }
        let url = self.url(&format!(
            "/daemon/{}/{}/{}",
            self.namespace, self.run_name, node
        ))?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        Self::expect_ok("getDaemonOnNode", &response)?;
        let address = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?
            .trim()
            .to_string();
        self.daemons
            .lock()
            .unwrap()
            .insert(node.to_string(), address.clone());
        Ok(address)
    }

    pub fn drop_cached_daemon(&self, node: &str) {
        self.daemons.lock().unwrap().remove(node);
    }
}

#[async_trait]
impl LocationSource for SchedulerClient {
    async fn file_location(&self, path: &Path) -> Result<FileLocation> {
        self.get_file_location(path).await
    }

    async fn report_location(&self, update: FileLocationUpdate, overwrite: bool) -> Result<()> {
        self.add_file_location(&update, overwrite).await
    }

    async fn daemon_on_node(&self, node: &str) -> Result<String> {
        self.daemon_address(node).await
    }

    fn invalidate_daemon(&self, node: &str) {
        self.drop_cached_daemon(node);
    }
}

fn is_unknown_host(err: &reqwest::Error) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        let message = e.to_string().to_lowercase();
        if message.contains("dns error")
            || message.contains("failed to lookup")
            || message.contains("name or service not known")
        {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_common::{fixture_client, HttpFixture};
    use porter_core::types::InputFile;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_register_task_round_trip() {
        let fixture = HttpFixture::start().await;
        fixture.respond_with("/scheduler/registerTask", r#"{"id":17,"state":"QUEUED"}"#);
        let client = fixture_client(&fixture, 10);

        let task = TaskConfig {
            run_name: "run".into(),
            task_name: "align".into(),
            scheduler_name: "workflow-scheduler".into(),
            cpus: 2,
            memory_mib: 2048,
            work_dir: PathBuf::from("/w/ab/12"),
            input_files: vec![InputFile {
                name: "reads.fq".into(),
                storage_path: PathBuf::from("/scratch/run/reads.fq"),
            }],
            output_patterns: vec!["*.bam".into()],
        };
        let handle = client.register_task(&task).await.unwrap();
        assert_eq!(handle.id, 17);
        assert_eq!(handle.state, "QUEUED");

        let requests = fixture.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(requests[0].path, "/scheduler/registerTask/ns/run");
        assert!(requests[0].body.contains("\"reads.fq\""));
    }

    #[tokio::test]
    async fn test_task_state_query() {
        let fixture = HttpFixture::start().await;
        fixture.respond_with(
            "/scheduler/taskstate",
            r#"{"state":"RUNNING","node":"node-a"}"#,
        );
        let client = fixture_client(&fixture, 10);
        let state = client.task_state(17).await.unwrap();
        assert_eq!(state.state, "RUNNING");
        assert!(!state.is_finished());
        assert_eq!(
            fixture.requests()[0].path,
            "/scheduler/taskstate/ns/run/17"
        );
    }

    #[tokio::test]
    async fn test_file_location_url_encodes_path() {
        let fixture = HttpFixture::start().await;
        fixture.respond_with(
            "/file/ns/run",
            r#"{"path":"/w/x y","node":"n","daemon":"d:21","same_as_engine":true,"location_wrapper_id":3}"#,
        );
        let client = fixture_client(&fixture, 10);
        let location = client
            .get_file_location(Path::new("/w/x y"))
            .await
            .unwrap();
        assert!(location.same_as_engine);
        assert_eq!(
            fixture.requests()[0].path,
            "/file/ns/run?path=%2Fw%2Fx%20y"
        );
    }

    #[tokio::test]
    async fn test_add_file_location_verbs_and_node() {
        let fixture = HttpFixture::start().await;
        let client = fixture_client(&fixture, 10);
        let mut update = FileLocationUpdate {
            path: PathBuf::from("/w/y"),
            size: 10,
            timestamp: 1000,
            location_wrapper_id: 9,
            node: None,
        };
        client.add_file_location(&update, false).await.unwrap();
        client.add_file_location(&update, true).await.unwrap();
        update.node = Some("node-c".into());
        client.add_file_location(&update, true).await.unwrap();

        let paths: Vec<String> = fixture.requests().iter().map(|r| r.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                "/file/location/add/ns/run",
                "/file/location/overwrite/ns/run",
                "/file/location/overwrite/ns/run/node-c",
            ]
        );
        let body = &fixture.requests()[0].body;
        assert!(body.contains("\"location_wrapper_id\":9"));
    }

    #[tokio::test]
    async fn test_daemon_address_cached_until_invalidated() {
        let fixture = HttpFixture::start().await;
        fixture.respond_with_text("/daemon/ns/run/node-a", "10.1.2.3:21");
        let client = fixture_client(&fixture, 10);

        assert_eq!(client.daemon_address("node-a").await.unwrap(), "10.1.2.3:21");
        assert_eq!(client.daemon_address("node-a").await.unwrap(), "10.1.2.3:21");
        assert_eq!(fixture.requests().len(), 1);

        client.drop_cached_daemon("node-a");
        assert_eq!(client.daemon_address("node-a").await.unwrap(), "10.1.2.3:21");
        assert_eq!(fixture.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_non_200_is_fatal() {
        let fixture = HttpFixture::start().await;
        fixture.respond_with_status("/scheduler/taskstate", 500);
        let client = fixture_client(&fixture, 10);
        let err = client.task_state(1).await.unwrap_err();
        match err {
            CoreError::Remote { op, status } => {
                assert_eq!(op, "getTaskState");
                assert_eq!(status, 500);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_close_is_best_effort_and_once() {
        let fixture = HttpFixture::start().await;
        let client = fixture_client(&fixture, 10);
        client.close().await;
        client.close().await;
        let requests = fixture.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "DELETE");
        assert_eq!(requests[0].path, "/scheduler/ns/run");
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_unresolved_endpoint_is_config_error() {
        let client =
            SchedulerClient::new("ns", "run", "http://engine", Default::default()).unwrap();
        let err = client.task_state(1).await.unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
