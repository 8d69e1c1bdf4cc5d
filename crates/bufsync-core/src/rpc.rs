//! The RPC seam to the external editing engine.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Method names understood by the external engine.
pub mod methods {
    pub const BUF_GET_CHANGEDTICK: &str = "nvim_buf_get_changedtick";
    pub const BUF_SET_LINES: &str = "nvim_buf_set_lines";
    pub const BUF_SET_VAR: &str = "nvim_buf_set_var";
    pub const CREATE_BUF: &str = "nvim_create_buf";
    pub const EXEC_LUA: &str = "nvim_exec_lua";
    pub const FEEDKEYS: &str = "nvim_feedkeys";
    pub const GET_CURRENT_WIN: &str = "nvim_get_current_win";
    pub const INPUT: &str = "nvim_input";
    pub const OPEN_WIN: &str = "nvim_open_win";
    pub const SET_CURRENT_WIN: &str = "nvim_set_current_win";
    pub const SET_OPTION: &str = "nvim_set_option";
    pub const WIN_CLOSE: &str = "nvim_win_close";
    pub const WIN_SET_CURSOR: &str = "nvim_win_set_cursor";
    pub const CALL_ATOMIC: &str = "nvim_call_atomic";

    pub const BUF_LINES_EVENT: &str = "nvim_buf_lines_event";
    pub const BUF_DETACH_EVENT: &str = "nvim_buf_detach_event";
}

/// Opaque id of a buffer inside the external engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Line batch reported by the external engine: `[first_line, last_line)` was
/// replaced by `line_data`. `first_line == last_line` is a pure insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub buffer: BufferId,
    pub tick: u64,
    pub first_line: usize,
    pub last_line: usize,
    pub line_data: Vec<String>,
    /// More records of the same batch are on their way.
    pub more: bool,
}

/// Structured events delivered by the external engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    BufLines(ChangeRecord),
    Detached(BufferId),
    Notification { method: String, params: Value },
}

/// One call inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    pub method: String,
    pub args: Vec<Value>,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("response channel closed")]
    ChannelClosed,

    #[error("cannot decode response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait RpcChannel: Send + Sync {
    async fn request(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError>;

    /// Run `calls` atomically. The outer error is a transport failure; the
    /// inner results are per call, in order.
    async fn call_atomic(&self, calls: Vec<RpcCall>) -> Result<Vec<Result<Value, String>>, RpcError>;
}

/// Run an atomic batch and log every failed call with its method name.
/// `nvim_input` is skipped since its result is not an error indicator.
/// Returns the number of failed calls.
pub async fn call_atomic_logged(channel: &dyn RpcChannel, calls: Vec<RpcCall>) -> Result<usize, RpcError> {
    let names: Vec<String> = calls.iter().map(|c| c.method.clone()).collect();
    let results = channel.call_atomic(calls).await?;

    let errors: Vec<String> = results
        .iter()
        .zip(&names)
        .filter_map(|(result, name)| match result {
            Err(e) if name != methods::INPUT => Some(format!("{name}: {e}")),
            _ => None,
        })
        .collect();

    if !errors.is_empty() {
        tracing::error!("Atomic call failed:\n{}", errors.join("\n"));
    }
    Ok(errors.len())
}
