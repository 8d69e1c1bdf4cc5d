use bufsync_core::rpc::methods;
use bufsync_core::{BufferId, ChangeRecord, EngineEvent, RpcError};
use serde_json::Value;

use crate::protocol::JsonRpcNotification;

/// Turn an engine notification into a structured event. Buffer line and
/// detach events are decoded; anything else is passed through untouched.
pub fn decode_event(notification: JsonRpcNotification) -> Result<EngineEvent, RpcError> {
    let JsonRpcNotification { method, params, .. } = notification;
    match method.as_str() {
        methods::BUF_LINES_EVENT => decode_buf_lines(&params).map(EngineEvent::BufLines),
        methods::BUF_DETACH_EVENT => Ok(EngineEvent::Detached(BufferId(param_u64(&params, 0, "buffer")?))),
        _ => Ok(EngineEvent::Notification { method, params }),
    }
}

/// `[buffer, changedtick, firstline, lastline, linedata, more]`
fn decode_buf_lines(params: &Value) -> Result<ChangeRecord, RpcError> {
    let buffer = param_u64(params, 0, "buffer")?;
    // The tick is null when only the buffer's options changed.
    let tick = params.get(1).and_then(Value::as_u64).unwrap_or(0);
    let first_line = line_index(params, 2, "firstline")?;
    let last_line = line_index(params, 3, "lastline")?;
    let line_data = params
        .get(4)
        .and_then(Value::as_array)
        .ok_or_else(|| decode_error("linedata"))?
        .iter()
        .map(|line| line.as_str().map(str::to_string).ok_or_else(|| decode_error("linedata")))
        .collect::<Result<Vec<_>, _>>()?;
    let more = params.get(5).and_then(Value::as_bool).unwrap_or(false);

    Ok(ChangeRecord {
        buffer: BufferId(buffer),
        tick,
        first_line,
        last_line,
        line_data,
        more,
    })
}

fn param_u64(params: &Value, idx: usize, name: &str) -> Result<u64, RpcError> {
    params.get(idx).and_then(Value::as_u64).ok_or_else(|| decode_error(name))
}

/// A negative line index (the initial full-buffer event uses -1) means
/// "through the end of the buffer".
fn line_index(params: &Value, idx: usize, name: &str) -> Result<usize, RpcError> {
    let value = params.get(idx).and_then(Value::as_i64).ok_or_else(|| decode_error(name))?;
    Ok(usize::try_from(value).unwrap_or(usize::MAX))
}

fn decode_error(field: &str) -> RpcError {
    RpcError::Decode(format!("buffer event has no valid {field}"))
}
