use std::io::{Read, Write};
use std::net::ToSocketAddrs;
use std::path::Path;
use std::time::Duration;

use suppaftp::types::FileType;
use suppaftp::{FtpStream, Mode};
use tokio::task;
use tracing::warn;

use porter_core::config::LocalityConfig;
use porter_core::shutdown::ShutdownSignal;
use porter_core::types::FileLocation;
use porter_core::{CoreError, Result};

use crate::local_path::LocationSource;

fn ftp_err(e: suppaftp::FtpError) -> CoreError {
    CoreError::Ftp(e.to_string())
}

fn open_session(daemon: &str, config: &LocalityConfig) -> Result<FtpStream> {
    let address = daemon
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| CoreError::Ftp(format!("daemon address '{}' does not resolve", daemon)))?;
    let mut ftp =
        FtpStream::connect_timeout(address, Duration::from_secs(config.ftp_timeout_secs))
            .map_err(ftp_err)?;
    ftp.login(&config.ftp_user, &config.ftp_password)
        .map_err(ftp_err)?;
    ftp.set_mode(Mode::Passive);
    ftp.transfer_type(FileType::Binary).map_err(ftp_err)?;
    Ok(ftp)
}

/// Retrieve the whole file into memory.
pub async fn fetch_bytes(
    client: &dyn LocationSource,
    location: &FileLocation,
    config: &LocalityConfig,
    shutdown: &ShutdownSignal,
) -> Result<Vec<u8>> {
    let remote = location.path.to_string_lossy().into_owned();
    with_retries(client, location, config, shutdown, move |daemon, cfg, _| {
        let mut ftp = open_session(&daemon, &cfg)?;
        let buffer = ftp.retr_as_buffer(&remote).map_err(ftp_err)?;
        let _ = ftp.quit();
        Ok(buffer.into_inner())
    })
    .await
}

/// Stream the file to `dest` in fixed-size chunks.
pub async fn fetch_to_file(
    client: &dyn LocationSource,
    location: &FileLocation,
    dest: &Path,
    config: &LocalityConfig,
    shutdown: &ShutdownSignal,
) -> Result<()> {
    let remote = location.path.to_string_lossy().into_owned();
    let dest = dest.to_path_buf();
    with_retries(
        client,
        location,
        config,
        shutdown,
        move |daemon, cfg, signal| {
            let mut ftp = open_session(&daemon, &cfg)?;
            let mut stream = ftp.retr_as_stream(&remote).map_err(ftp_err)?;
            let mut file = std::fs::File::create(&dest)?;
            let mut buf = vec![0u8; cfg.download_chunk_bytes.max(1)];
            loop {
                if signal.is_shutdown() {
                    return Err(CoreError::Cancelled);
                }
                let n = stream.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                file.write_all(&buf[..n])?;
            }
            ftp.finalize_retr_stream(stream).map_err(ftp_err)?;
            let _ = ftp.quit();
            file.flush()?;
            Ok(())
        },
    )
    .await
}

/// Run a blocking FTP operation with the transfer retry policy: exponential
/// pauses, and a fresh daemon address between attempts because the daemon
/// pod may have been rescheduled.
async fn with_retries<T, F>(
    client: &dyn LocationSource,
    location: &FileLocation,
    config: &LocalityConfig,
    shutdown: &ShutdownSignal,
    op: F,
) -> Result<T>
where
    T: Send + 'static,
    F: Fn(String, LocalityConfig, ShutdownSignal) -> Result<T> + Clone + Send + 'static,
{
    let policy = config.ftp;
    let mut daemon = location.daemon.clone();
    let mut attempt: u32 = 0;
    loop {
        if shutdown.is_shutdown() {
            return Err(CoreError::Cancelled);
        }
        let run = op.clone();
        let run_daemon = daemon.clone();
        let run_config = config.clone();
        let run_signal = shutdown.clone();
        let outcome = task::spawn_blocking(move || run(run_daemon, run_config, run_signal))
            .await
            .map_err(|e| CoreError::Ftp(format!("transfer task failed: {}", e)))?;
        match outcome {
            Ok(value) => return Ok(value),
            Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(e);
                }
                warn!(
                    "FTP attempt {}/{} against {} failed: {}",
                    attempt, policy.max_attempts, daemon, e
                );
                tokio::time::sleep(policy.backoff(attempt - 1)).await;
                client.invalidate_daemon(&location.node);
                daemon = client.daemon_on_node(&location.node).await?;
            }
        }
    }
}
