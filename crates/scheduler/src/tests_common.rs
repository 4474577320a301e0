use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use porter_core::config::{SchedulerConfig, SchedulerPodConfig, ScratchConfig};
use porter_core::{CoreError, Result};

use crate::bringup::{ClusterOps, PodPhase};
use crate::client::SchedulerClient;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// One-connection-per-request HTTP recorder with canned responses.
pub struct HttpFixture {
    port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    routes: Arc<Mutex<Vec<(String, u16, String)>>>,
}

impl HttpFixture {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();
        let routes: Arc<Mutex<Vec<(String, u16, String)>>> = Arc::default();
        let fixture = Self {
            port,
            requests: requests.clone(),
            routes: routes.clone(),
        };
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let requests = requests.clone();
                let routes = routes.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, requests, routes).await;
                });
            }
        });
        fixture
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Respond 200 with `body` for any path starting with `prefix`.
    pub fn respond_with(&self, prefix: &str, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .push((prefix.to_string(), 200, body.to_string()));
    }

    pub fn respond_with_text(&self, prefix: &str, body: &str) {
        self.respond_with(prefix, body);
    }

    pub fn respond_with_status(&self, prefix: &str, status: u16) {
        self.routes
            .lock()
            .unwrap()
            .push((prefix.to_string(), status, "{}".to_string()));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn handle_connection(
    stream: TcpStream,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    routes: Arc<Mutex<Vec<(String, u16, String)>>>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).await?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some(value) = header
            .to_ascii_lowercase()
            .strip_prefix("content-length:")
            .map(str::trim)
            .and_then(|v| v.parse::<usize>().ok())
        {
            content_length = value;
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;
    let body = String::from_utf8_lossy(&body).into_owned();

    requests.lock().unwrap().push(RecordedRequest {
        method,
        path: path.clone(),
        body,
    });

    let (status, payload) = routes
        .lock()
        .unwrap()
        .iter()
        .find(|(prefix, _, _)| path.starts_with(prefix))
        .map(|(_, status, payload)| (*status, payload.clone()))
        .unwrap_or((200, "{}".to_string()));
    let reason = if status == 200 { "OK" } else { "Error" };
    let response = format!(
        "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status,
        reason,
        payload.len(),
        payload
    );
    write_half.write_all(response.as_bytes()).await?;
    write_half.shutdown().await?;
    Ok(())
}

/// A client wired to the fixture, with the endpoint already resolved.
pub fn fixture_client(fixture: &HttpFixture, batch_size: usize) -> SchedulerClient {
    let config = SchedulerConfig {
        batch_size,
        ..SchedulerConfig::default()
    };
    let client = SchedulerClient::new("ns", "run", "http://engine", config).unwrap();
    client.set_endpoint(fixture.base_url());
    client
}

/// Scripted stand-in for the external Kubernetes client.
pub struct MockCluster {
    url: String,
    phases: Mutex<VecDeque<PodPhase>>,
    pub created: AtomicUsize,
    pub deleted: AtomicUsize,
    pub daemonsets: AtomicUsize,
    env: Mutex<Vec<(String, String)>>,
}

impl MockCluster {
    pub fn scripted(url: String, phases: Vec<PodPhase>) -> Self {
        Self {
            url,
            phases: Mutex::new(phases.into()),
            created: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
            daemonsets: AtomicUsize::new(0),
            env: Mutex::new(Vec::new()),
        }
    }

    pub fn last_env(&self) -> Vec<(String, String)> {
        self.env.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterOps for MockCluster {
    async fn pod_phase(&self, _name: &str) -> Result<PodPhase> {
        let mut phases = self.phases.lock().unwrap();
        if phases.len() > 1 {
            Ok(phases.pop_front().unwrap())
        } else {
            phases
                .front()
                .copied()
                .ok_or_else(|| CoreError::Config("mock has no pod phase".into()))
        }
    }

    async fn create_pod(&self, _pod: &SchedulerPodConfig, env: &[(String, String)]) -> Result<()> {
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.env.lock().unwrap() = env.to_vec();
        Ok(())
    }

    async fn delete_pod(&self, _name: &str) -> Result<()> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pod_ip(&self, _name: &str) -> Result<Option<String>> {
        Ok(Some("10.0.0.7".to_string()))
    }

    async fn create_daemonset(&self, _scratch: &ScratchConfig) -> Result<()> {
        self.daemonsets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pod_dns_url(&self, _ip: &str, _namespace: &str, _port: u16) -> String {
        self.url.clone()
    }
}
