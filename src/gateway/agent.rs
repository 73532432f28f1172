//! Framed TCP client for the DUT command-execution agent

use async_trait::async_trait;
use provision_shared::codec::{self, FrameDecoder};
use provision_shared::{timing, AgentRequest, AgentResponse, ExecResult, ProvisionError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::traits::DutGateway;

/// In-shell existence probe; the path arrives as `$1`, never spliced
/// into the script.
const EXISTS_SCRIPT: &str = r#"[ -e "$1" ] && echo -n 1 || echo -n 0"#;

/// Gateway backed by the command-execution agent next to the DUT.
///
/// Holds one connection and reopens it on demand; a call that hits a
/// dead connection drops it and fails as `DutUnreachable`, leaving the
/// next call to reconnect.
pub struct AgentGateway {
    addr: String,
    no_reboot: bool,
    conn: Mutex<Option<AgentConn>>,
}

struct AgentConn {
    stream: TcpStream,
    decoder: FrameDecoder,
}

impl AgentConn {
    async fn open(addr: &str) -> Result<Self, ProvisionError> {
        let stream = timeout(timing::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ProvisionError::DutUnreachable(format!("connect to {} timed out", addr)))?
            .map_err(|e| ProvisionError::DutUnreachable(format!("connect to {}: {}", addr, e)))?;
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(),
        })
    }

    /// One request/response exchange on this connection.
    async fn call(&mut self, request: &AgentRequest) -> Result<AgentResponse, ProvisionError> {
        let encoded =
            codec::encode(request).map_err(|e| ProvisionError::Protocol(e.to_string()))?;
        self.stream
            .write_all(&encoded)
            .await
            .map_err(|e| ProvisionError::DutUnreachable(format!("agent write: {}", e)))?;

        let mut buf = vec![0u8; 4096];
        loop {
            if let Some(response) = self
                .decoder
                .decode_next::<AgentResponse>()
                .map_err(|e| ProvisionError::Protocol(e.to_string()))?
            {
                return Ok(response);
            }

            let n = timeout(timing::CALL_TIMEOUT, self.stream.read(&mut buf))
                .await
                .map_err(|_| ProvisionError::DutUnreachable("agent call timed out".into()))?
                .map_err(|e| ProvisionError::DutUnreachable(format!("agent read: {}", e)))?;
            if n == 0 {
                return Err(ProvisionError::DutUnreachable(
                    "agent closed the connection".into(),
                ));
            }
            self.decoder.extend(&buf[..n]);
        }
    }
}

impl AgentGateway {
    pub fn new(addr: impl Into<String>, no_reboot: bool) -> Self {
        Self {
            addr: addr.into(),
            no_reboot,
            conn: Mutex::new(None),
        }
    }

    async fn call(&self, request: AgentRequest) -> Result<AgentResponse, ProvisionError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(AgentConn::open(&self.addr).await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(ProvisionError::DutUnreachable("no agent connection".into()));
        };
        match conn.call(&request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                // Connection state is unknown after a failed exchange.
                *guard = None;
                Err(err)
            }
        }
    }

    async fn exec(&self, command: &str, args: &[&str]) -> Result<ExecResult, ProvisionError> {
        let request = AgentRequest::Exec {
            command: command.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
        };
        match self.call(request).await? {
            AgentResponse::Exec(result) => Ok(result),
            AgentResponse::Error { message } => Err(ProvisionError::Protocol(message)),
            other => Err(ProvisionError::Protocol(format!(
                "unexpected agent response: {:?}",
                other
            ))),
        }
    }

    /// Drop the held connection, e.g. because the device is rebooting.
    async fn disconnect(&self) {
        *self.conn.lock().await = None;
    }
}

#[async_trait]
impl DutGateway for AgentGateway {
    async fn run_command(&self, command: &str, args: &[&str]) -> Result<String, ProvisionError> {
        debug!("{}: run {} {}", self.addr, command, args.join(" "));
        let result = self.exec(command, args).await?;
        if !result.success() {
            return Err(ProvisionError::RemoteExecution {
                exit_status: result.exit_status,
                stderr: result.stderr,
            });
        }
        Ok(result.stdout)
    }

    async fn path_exists(&self, path: &str) -> Result<bool, ProvisionError> {
        // Existence is probed in-shell so a missing path is a normal
        // result instead of a non-zero exit.
        let out = self
            .run_command("sh", &["-c", EXISTS_SCRIPT, "_", path])
            .await?;
        Ok(out == "1")
    }

    async fn cache_and_resolve(&self, url: &str) -> Result<String, ProvisionError> {
        let name = match self.call(AgentRequest::Cache { url: url.into() }).await? {
            AgentResponse::CacheStarted { name } => name,
            AgentResponse::Error { message } => return Err(ProvisionError::Cache(message)),
            other => {
                return Err(ProvisionError::Protocol(format!(
                    "unexpected cache response: {:?}",
                    other
                )))
            }
        };
        debug!("{}: cache of {} started as {}", self.addr, url, name);

        let deadline = Instant::now() + timing::CACHE_WAIT_TIMEOUT;
        loop {
            match self
                .call(AgentRequest::CacheStatus { name: name.clone() })
                .await?
            {
                AgentResponse::Cache {
                    done: true,
                    url: Some(resolved),
                    error: None,
                } => return Ok(resolved),
                AgentResponse::Cache {
                    done: true,
                    error: Some(message),
                    ..
                } => return Err(ProvisionError::Cache(message)),
                AgentResponse::Cache { done: true, .. } => {
                    return Err(ProvisionError::Cache(
                        "cache operation finished without a resolved URL".into(),
                    ))
                }
                AgentResponse::Cache { .. } => {}
                AgentResponse::Error { message } => return Err(ProvisionError::Cache(message)),
                other => {
                    return Err(ProvisionError::Protocol(format!(
                        "unexpected cache response: {:?}",
                        other
                    )))
                }
            }
            if Instant::now() >= deadline {
                return Err(ProvisionError::Cache(format!(
                    "timed out waiting for cache of {}",
                    url
                )));
            }
            sleep(timing::CACHE_POLL_INTERVAL).await;
        }
    }

    async fn create_directories(&self, paths: &[&str]) -> Result<(), ProvisionError> {
        let mut args = vec!["-p"];
        args.extend_from_slice(paths);
        self.run_command("mkdir", &args).await?;
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<(), ProvisionError> {
        self.run_command("rm", &["-rf", path]).await?;
        Ok(())
    }

    async fn restart(&self) -> Result<(), ProvisionError> {
        if self.no_reboot {
            info!("{}: restart suppressed by configuration", self.addr);
            return Ok(());
        }

        match self.call(AgentRequest::Restart).await {
            Ok(AgentResponse::Ok) => {}
            Ok(AgentResponse::Error { message }) => return Err(ProvisionError::Protocol(message)),
            Ok(other) => {
                return Err(ProvisionError::Protocol(format!(
                    "unexpected restart response: {:?}",
                    other
                )))
            }
            // The connection may die as the device goes down; keep
            // waiting for it to come back.
            Err(ProvisionError::DutUnreachable(reason)) => {
                warn!("{}: restart exchange dropped: {}", self.addr, reason);
            }
            Err(err) => return Err(err),
        }
        self.disconnect().await;

        info!("{}: waiting for device to come back", self.addr);
        let deadline = Instant::now() + timing::RESTART_TIMEOUT;
        loop {
            sleep(timing::RESTART_POLL_INTERVAL).await;
            if let Ok(result) = self.exec("true", &[]).await {
                if result.success() {
                    info!("{}: device is back", self.addr);
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(ProvisionError::DutUnreachable(format!(
                    "{} did not come back within {:?}",
                    self.addr,
                    timing::RESTART_TIMEOUT
                )));
            }
        }
    }

    fn target(&self) -> &str {
        &self.addr
    }
}
