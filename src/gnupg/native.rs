//! Native messaging client for the GnuPG host program.
//!
//! Every request spawns the host, writes one frame to its stdin and reads
//! one frame from its stdout. A frame is a 32-bit length in native byte
//! order followed by that many bytes of UTF-8 JSON.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{
    AgentDecryptResult, AgentEncryptRequest, AgentImportResult, ArmoredKeys, GpgAgent,
};
use crate::config::GnupgConfig;
use crate::error::{Error, Result};

/// Largest frame accepted from the host.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Write one native messaging frame.
pub async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .map_err(|_| Error::InvalidInput("native message too large".to_string()))?;
    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one native messaging frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Value>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_ne_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Agent(format!("frame of {} bytes exceeds limit", len)));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// [`GpgAgent`] that talks to a native messaging host program.
#[derive(Debug, Clone)]
pub struct NativeMessagingAgent {
    program: PathBuf,
    timeout: Duration,
}

impl NativeMessagingAgent {
    /// Agent that runs `program` for every request.
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Agent for the configured host, `None` when GnuPG support is off.
    pub fn from_config(config: &GnupgConfig) -> Option<Self> {
        config
            .native_host
            .as_ref()
            .map(|program| Self::new(program.clone(), config.timeout))
    }

    async fn request<T: DeserializeOwned>(&self, message: Value) -> Result<T> {
        let op = message["op"].as_str().unwrap_or_default().to_string();
        debug!(op = %op, program = %self.program.display(), "native messaging request");

        let exchange = async {
            let mut child = Command::new(&self.program)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()?;

            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| Error::Agent("host stdin unavailable".to_string()))?;
            let mut stdout = child
                .stdout
                .take()
                .ok_or_else(|| Error::Agent("host stdout unavailable".to_string()))?;

            write_frame(&mut stdin, &message).await?;
            drop(stdin);
            let response = read_frame(&mut stdout).await?;
            match child.wait().await {
                Ok(status) if !status.success() => {
                    warn!(op = %op, %status, "native messaging host exited with failure")
                }
                Ok(_) => {}
                Err(e) => warn!(op = %op, error = %e, "native messaging host could not be reaped"),
            }
            Ok::<Value, Error>(response)
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::Agent(format!("{} timed out", op)))??;

        if let Some(msg) = response.get("error").and_then(Value::as_str) {
            warn!(op = %op, "native messaging host reported an error");
            return Err(Error::Agent(msg.to_string()));
        }

        Ok(serde_json::from_value(response)?)
    }
}

#[async_trait]
impl GpgAgent for NativeMessagingAgent {
    async fn get_keys_armored(&self) -> Result<ArmoredKeys> {
        self.request(json!({ "op": "getKeysArmored" })).await
    }

    async fn get_default_key(&self) -> Result<Option<String>> {
        let response: Value = self.request(json!({ "op": "getDefaultKey" })).await?;
        Ok(response
            .get("fingerprint")
            .and_then(Value::as_str)
            .filter(|fpr| !fpr.is_empty())
            .map(str::to_string))
    }

    async fn import_keys(&self, armored: &str) -> Result<AgentImportResult> {
        self.request(json!({ "op": "importKeys", "armored": armored }))
            .await
    }

    async fn encrypt(&self, request: AgentEncryptRequest) -> Result<String> {
        let mut message = serde_json::to_value(&request)?;
        message["op"] = json!("encrypt");
        let response: Value = self.request(message).await?;
        response
            .get("data")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Agent("encrypt response without data".to_string()))
    }

    async fn decrypt(&self, armored: &str) -> Result<AgentDecryptResult> {
        self.request(json!({ "op": "decrypt", "data": armored }))
            .await
    }
}
