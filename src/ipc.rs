//! Line-delimited JSON transport to the native execution process.
//!
//! The adapter handles strictly one request at a time, so the client keeps a
//! single worker thread that writes a line, blocks on the matching response
//! line, and only then takes the next request. Responses correlate 1:1 by
//! order; request_id is carried for sanity checking and logs.

use crate::config::env_u64;
use crate::error::AgentError;
use crate::schema::{AgentAction, IpcRequest, IpcResponse};
use async_trait::async_trait;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Seam between the control loop and the execution process. The production
/// implementation is `AdapterClient`; tests use `adapter::InProcAdapter`.
#[async_trait]
pub trait Adapter: Send {
    async fn request(&mut self, action: AgentAction) -> Result<IpcResponse, AgentError>;
}

type Pending = (IpcRequest, oneshot::Sender<Result<IpcResponse, AgentError>>);

pub struct AdapterClient {
    tx: std::sync::mpsc::Sender<Pending>,
    timeout: Duration,
}

impl AdapterClient {
    /// Spawn the adapter child process and the worker thread that owns its
    /// pipes. The child's stderr is inherited so its logs interleave with
    /// ours without touching the protocol stream.
    pub fn spawn(adapter_path: &str) -> Result<Self, AgentError> {
        let mut child = Command::new(adapter_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| AgentError::Ipc(format!("failed to spawn adapter at {adapter_path}: {e}")))?;

        info!(pid = child.id(), path = adapter_path, "adapter process spawned");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Ipc("adapter stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Ipc("adapter stdout unavailable".to_string()))?;

        let (tx, rx) = std::sync::mpsc::channel::<Pending>();

        std::thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            while let Ok((req, reply)) = rx.recv() {
                let outcome = Self::round_trip(&mut stdin, &mut reader, &req);
                // The caller may have timed out and dropped its receiver.
                let _ = reply.send(outcome);
            }
            let _ = child.kill();
            let _ = child.wait();
        });

        Ok(Self {
            tx,
            timeout: Duration::from_secs(env_u64("IPC_TIMEOUT_SECS", 15)),
        })
    }

    fn round_trip(
        stdin: &mut impl Write,
        reader: &mut impl BufRead,
        req: &IpcRequest,
    ) -> Result<IpcResponse, AgentError> {
        let line = serde_json::to_string(req)?;
        stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush())
            .map_err(|e| AgentError::Ipc(format!("write to adapter failed: {e}")))?;

        let mut response_line = String::new();
        let n = reader
            .read_line(&mut response_line)
            .map_err(|e| AgentError::Ipc(format!("read from adapter failed: {e}")))?;
        if n == 0 {
            return Err(AgentError::Ipc("adapter closed its stdout".to_string()));
        }

        let resp: IpcResponse = serde_json::from_str(response_line.trim())
            .map_err(|e| AgentError::Ipc(format!("unparseable adapter response: {e}")))?;
        if resp.request_id != req.id && resp.request_id != "unknown" {
            warn!(
                expected = %req.id,
                got = %resp.request_id,
                "response id mismatch on ordered channel"
            );
        }
        Ok(resp)
    }
}

#[async_trait]
impl Adapter for AdapterClient {
    async fn request(&mut self, action: AgentAction) -> Result<IpcResponse, AgentError> {
        let req = IpcRequest {
            id: Uuid::new_v4().to_string(),
            action,
        };
        let kind = req.action.kind();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((req, reply_tx))
            .map_err(|_| AgentError::Ipc("adapter worker gone".to_string()))?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AgentError::Ipc("adapter worker dropped reply".to_string())),
            Err(_) => {
                error!(action = kind, "adapter request timed out");
                Err(AgentError::Timeout(format!("adapter request {kind}")))
            }
        }
    }
}
