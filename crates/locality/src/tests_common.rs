use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use porter_core::types::{FileLocation, FileLocationUpdate};
use porter_core::{CoreError, Result};

use crate::local_path::LocationSource;

/// Scripted stand-in for the scheduler client.
#[derive(Default)]
pub struct MockSource {
    pub location: Mutex<Option<FileLocation>>,
    pub daemon: Mutex<Option<String>>,
    pub reports: Mutex<Vec<(FileLocationUpdate, bool)>>,
    pub location_queries: AtomicUsize,
    pub daemon_queries: AtomicUsize,
    pub invalidations: AtomicUsize,
}

impl MockSource {
    pub fn with_daemon(addr: String) -> Self {
        let source = Self::default();
        *source.daemon.lock().unwrap() = Some(addr);
        source
    }

    pub fn with_location(location: FileLocation) -> Self {
        let source = Self::default();
        *source.location.lock().unwrap() = Some(location);
        source
    }

    pub fn reports(&self) -> Vec<(FileLocationUpdate, bool)> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocationSource for MockSource {
    async fn file_location(&self, _path: &Path) -> Result<FileLocation> {
        self.location_queries.fetch_add(1, Ordering::SeqCst);
        self.location
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CoreError::Config("mock has no location".into()))
    }

    async fn report_location(&self, update: FileLocationUpdate, overwrite: bool) -> Result<()> {
        self.reports.lock().unwrap().push((update, overwrite));
        Ok(())
    }

    async fn daemon_on_node(&self, _node: &str) -> Result<String> {
        self.daemon_queries.fetch_add(1, Ordering::SeqCst);
        self.daemon
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CoreError::Config("mock has no daemon".into()))
    }

    fn invalidate_daemon(&self, _node: &str) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Just enough of an RFC-959 server to satisfy the client's passive-mode
/// retrieval: USER/PASS/TYPE/PASV/RETR/QUIT on one control connection at a
/// time, serving a fixed payload for every RETR.
pub struct FtpFixture {
    port: u16,
    retrs: Arc<AtomicUsize>,
    sessions: Arc<AtomicUsize>,
}

impl FtpFixture {
    pub async fn serve(payload: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let retrs = Arc::new(AtomicUsize::new(0));
        let sessions = Arc::new(AtomicUsize::new(0));
        let fixture = Self {
            port,
            retrs: retrs.clone(),
            sessions: sessions.clone(),
        };
        tokio::spawn(async move {
            loop {
                let Ok((control, _)) = listener.accept().await else {
                    break;
                };
                sessions.fetch_add(1, Ordering::SeqCst);
                let _ = handle_session(control, payload.clone(), retrs.clone()).await;
            }
        });
        fixture
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn retr_count(&self) -> usize {
        self.retrs.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

async fn handle_session(
    control: TcpStream,
    payload: Vec<u8>,
    retrs: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = control.into_split();
    let mut lines = BufReader::new(read_half).lines();
    write_half.write_all(b"220 test daemon ready\r\n").await?;

    let mut data_listener: Option<TcpListener> = None;
    while let Some(line) = lines.next_line().await? {
        let command = line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        match command.as_str() {
            "USER" => write_half.write_all(b"331 password please\r\n").await?,
            "PASS" => write_half.write_all(b"230 logged in\r\n").await?,
            "TYPE" => write_half.write_all(b"200 type set\r\n").await?,
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let port = listener.local_addr()?.port();
                let reply = format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{})\r\n",
                    port / 256,
                    port % 256
                );
                data_listener = Some(listener);
                write_half.write_all(reply.as_bytes()).await?;
            }
            "RETR" => {
                retrs.fetch_add(1, Ordering::SeqCst);
                write_half
                    .write_all(b"150 opening data connection\r\n")
                    .await?;
                if let Some(listener) = data_listener.take() {
                    if let Ok((mut data, _)) = listener.accept().await {
                        data.write_all(&payload).await?;
                        data.shutdown().await?;
                    }
                }
                write_half.write_all(b"226 transfer complete\r\n").await?;
            }
            "QUIT" => {
                write_half.write_all(b"221 goodbye\r\n").await?;
                break;
            }
            _ => write_half.write_all(b"200 noted\r\n").await?,
        }
    }
    Ok(())
}
