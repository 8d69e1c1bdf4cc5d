use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bufsync_core::rpc::methods;
use bufsync_core::{EngineEvent, RpcCall, RpcChannel, RpcError};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::decode_event;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<JsonRpcResponse>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// JSON-RPC client that talks to the external engine over newline-delimited
/// JSON. Responses are matched to requests by id; notifications are decoded
/// and forwarded on the event channel.
pub struct EngineClient {
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl EngineClient {
    /// Must be called from within a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, events: mpsc::UnboundedSender<EngineEvent>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(Self::reader_loop(reader, events, Arc::clone(&pending)));
        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            reader,
        }
    }

    pub fn from_process(process: &mut Child, events: mpsc::UnboundedSender<EngineEvent>) -> Result<Self, RpcError> {
        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| RpcError::Transport("Failed to capture engine stdin".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| RpcError::Transport("Failed to capture engine stdout".to_string()))?;
        Ok(Self::new(stdout, stdin, events))
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, Some(params));

        let mut request_line =
            serde_json::to_string(&request).map_err(|e| RpcError::Transport(format!("Serialize error: {e}")))?;
        request_line.push('\n');

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        if let Err(e) = self.write_line(&request_line).await {
            lock(&self.pending).remove(&id);
            return Err(e);
        }

        let response = rx.await.map_err(|_| RpcError::ChannelClosed)?;
        response.into_result()
    }

    async fn write_line(&self, line: &str) -> Result<(), RpcError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RpcError::Transport(format!("Write error: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| RpcError::Transport(format!("Flush error: {e}")))?;
        Ok(())
    }

    /// Read loop: parse messages from the engine and dispatch them.
    async fn reader_loop<R>(reader: R, events: mpsc::UnboundedSender<EngineEvent>, pending: PendingMap)
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Engine read error: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let msg: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Dropping malformed engine message: {}", e);
                    continue;
                }
            };

            // Dispatch: response or notification?
            if msg.get("method").is_none() {
                match serde_json::from_value::<JsonRpcResponse>(msg) {
                    Ok(response) => match lock(&pending).remove(&response.id) {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => debug!("Response for unknown request {}", response.id),
                    },
                    Err(e) => warn!("Dropping malformed engine response: {}", e),
                }
                continue;
            }

            let notification = match serde_json::from_value::<JsonRpcNotification>(msg) {
                Ok(n) => n,
                Err(e) => {
                    warn!("Dropping malformed engine notification: {}", e);
                    continue;
                }
            };
            match decode_event(notification) {
                Ok(event) => {
                    if events.send(event).is_err() {
                        debug!("Engine event receiver dropped");
                    }
                }
                Err(e) => warn!("Cannot decode engine event: {}", e),
            }
        }

        info!("Engine output closed");
        // Waiting callers see the dropped senders as a closed channel.
        lock(&pending).clear();
    }
}

impl Drop for EngineClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl RpcChannel for EngineClient {
    async fn request(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call(method, Value::Array(args)).await
    }

    async fn call_atomic(&self, calls: Vec<RpcCall>) -> Result<Vec<Result<Value, String>>, RpcError> {
        let count = calls.len();
        let batch: Vec<Value> = calls.into_iter().map(|call| json!([call.method, call.args])).collect();
        let response = self.call(methods::CALL_ATOMIC, json!([batch])).await?;
        split_atomic_response(response, count)
    }
}

/// Split an atomic batch response `[results, error]` into one result per
/// call. `error` is null or `[index, kind, message]`; calls after the failed
/// one were never run.
pub fn split_atomic_response(response: Value, count: usize) -> Result<Vec<Result<Value, String>>, RpcError> {
    let Value::Array(parts) = response else {
        return Err(RpcError::Decode("atomic response is not an array".to_string()));
    };
    let mut parts = parts.into_iter();
    let results = match parts.next() {
        Some(Value::Array(results)) => results,
        _ => return Err(RpcError::Decode("atomic response has no results".to_string())),
    };

    let failed = match parts.next() {
        Some(Value::Array(error)) => {
            let index = error.first().and_then(Value::as_u64).unwrap_or(0) as usize;
            let message = error
                .get(2)
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            Some((index, message))
        }
        _ => None,
    };

    let mut results = results.into_iter();
    Ok((0..count)
        .map(|i| match &failed {
            Some((index, message)) if i == *index => Err(message.clone()),
            Some((index, _)) if i > *index => Err("not executed".to_string()),
            _ => Ok(results.next().unwrap_or(Value::Null)),
        })
        .collect())
}
