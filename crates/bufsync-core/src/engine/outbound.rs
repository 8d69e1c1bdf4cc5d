use serde_json::{json, Value};
use tracing::{debug, error, warn};

use super::SyncEngine;
use crate::error::{Result, SyncError};
use crate::host::{ContentChange, DocumentId, Eol, HostChangeEvent};
use crate::position::{char_to_byte, Position};
use crate::repeat::{is_cursor_change, RepeatChange};
use crate::rpc::{call_atomic_logged, methods, BufferId, RpcCall};

/// One byte-addressed range replacement for the external engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundChange {
    pub start_line: usize,
    pub start_byte: usize,
    pub end_line: usize,
    pub end_byte: usize,
    pub new_lines: Vec<String>,
}

impl OutboundChange {
    /// Wire form: `[start_line, start_byte, end_line, end_byte, lines]`.
    pub fn to_value(&self) -> Value {
        json!([
            self.start_line,
            self.start_byte,
            self.end_line,
            self.end_byte,
            self.new_lines
        ])
    }
}

/// Changes of one host event, stamped with the tick the external buffer
/// had before they are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundBatch {
    pub buffer: BufferId,
    pub tick: u64,
    pub changes: Vec<OutboundChange>,
}

/// Translate host content changes into byte-addressed changes against
/// `orig_text`, the text the external engine holds before them.
pub fn build_outbound_changes(orig_text: &str, eol: Eol, changes: &[ContentChange]) -> Vec<OutboundChange> {
    let lines: Vec<&str> = orig_text.split(eol.as_str()).collect();
    let byte_col = |pos: Position| char_to_byte(lines.get(pos.line).copied().unwrap_or(""), pos.character);

    changes
        .iter()
        .map(|change| OutboundChange {
            start_line: change.range.start.line,
            start_byte: byte_col(change.range.start),
            end_line: change.range.end.line,
            end_byte: byte_col(change.range.end),
            new_lines: eol.split(&change.text),
        })
        .collect()
}

impl SyncEngine {
    /// Forward one host change event to the external engine. Events are
    /// sent one at a time, in the order this is called.
    pub async fn on_host_change(&self, event: HostChangeEvent) {
        let _guard = self.change_lock.lock().await;

        let HostChangeEvent {
            document,
            version,
            eol,
            changes,
            text,
        } = event;
        debug!("Change text document for {}, version {}", document, version);

        let orig_text = self.state().known_content.get(&document).cloned();
        let Some(orig_text) = orig_text else {
            warn!("Can't get last known external content for {}, skipping", document);
            return;
        };

        let skip_version = self.skip_version(&document);
        if version <= skip_version {
            debug!("Skipping change for {}: version {} <= {}", document, version, skip_version);
            self.state().known_content.insert(document, text);
            return;
        }

        if self.settings.repeat.enabled && self.host.is_insert_mode() {
            if let Some(cursor) = self.host.active_cursor(&document) {
                self.capture_repeat(&changes, cursor, eol);
            }
        }

        let outbound = build_outbound_changes(&orig_text, eol, &changes);
        self.state().known_content.insert(document.clone(), text);

        let (buffer, tick) = match self.changed_tick(&document).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Can't get changed tick for {}: {}", document, e);
                return;
            }
        };
        if tick == 0 {
            warn!("Can't get changed tick for buffer {}, deleted?", buffer);
            return;
        }

        let batch = OutboundBatch {
            buffer,
            tick,
            changes: outbound,
        };
        self.state()
            .skip_ticks
            .insert(buffer, tick + batch.changes.len() as u64);

        if let Err(e) = self.send_batch(&batch).await {
            error!("Failed to send changes for buffer {}: {}", buffer, e);
        }
    }

    /// Buffer paired with `document` and its current changed tick. A null
    /// tick reads as 0.
    async fn changed_tick(&self, document: &DocumentId) -> Result<(BufferId, u64)> {
        let buffer = self.require_buffer(document)?;
        let value = self
            .rpc
            .request(methods::BUF_GET_CHANGEDTICK, vec![json!(buffer.0)])
            .await?;
        let tick: Option<u64> = serde_json::from_value(value)?;
        Ok((buffer, tick.unwrap_or(0)))
    }

    async fn send_batch(&self, batch: &OutboundBatch) -> Result<()> {
        let changes: Vec<Value> = batch.changes.iter().map(OutboundChange::to_value).collect();
        debug!(
            "Sending {} change(s) to buffer {} at tick {}",
            changes.len(),
            batch.buffer,
            batch.tick
        );
        self.rpc
            .request(
                methods::EXEC_LUA,
                vec![
                    json!(self.settings.engine.handle_changes_lua),
                    json!([batch.buffer.0, changes]),
                ],
            )
            .await?;
        Ok(())
    }

    fn capture_repeat(&self, changes: &[ContentChange], cursor: Position, eol: Eol) {
        let mut st = self.state();
        let state = &mut *st;
        for change in changes.iter().filter(|c| is_cursor_change(c, cursor, eol)) {
            match state.repeat.as_mut() {
                Some(acc) if acc.is_subsequent_to(change) => acc.accumulate(change),
                _ => state.repeat = Some(RepeatChange::from_change(change, eol)),
            }
        }
    }

    /// Replay the accumulated insert-mode change inside a scratch buffer so
    /// the external engine's repeat command reproduces it. The accumulator
    /// is cleared whether or not the replay succeeds.
    pub async fn sync_repeat_change(&self) {
        let change = self.state().repeat.take();
        let Some(change) = change else {
            return;
        };
        debug!("Syncing repeat change");
        if let Err(e) = self.replay_repeat(&change).await {
            error!("Failed to replay repeat change: {}", e);
        }
    }

    async fn replay_repeat(&self, change: &RepeatChange) -> Result<()> {
        let settings = &self.settings.repeat;
        let current_win = self.rpc.request(methods::GET_CURRENT_WIN, vec![]).await?;

        let buffer = self
            .rpc
            .request(methods::CREATE_BUF, vec![json!(false), json!(true)])
            .await?;
        if buffer.is_null() {
            return Err(SyncError::Other("cannot create repeat buffer".to_string()));
        }
        // Marks the buffer for the cleanup chunk.
        self.rpc
            .request(
                methods::BUF_SET_VAR,
                vec![buffer.clone(), json!(settings.buffer_var), json!(true)],
            )
            .await?;

        self.rpc
            .request(
                methods::SET_OPTION,
                vec![json!("eventignore"), json!("BufWinEnter,BufEnter,BufLeave")],
            )
            .await?;
        let window = self
            .rpc
            .request(
                methods::OPEN_WIN,
                vec![
                    buffer.clone(),
                    json!(true),
                    json!({
                        "external": true,
                        "width": settings.window_width,
                        "height": settings.window_height,
                    }),
                ],
            )
            .await;
        let restored = self
            .rpc
            .request(methods::SET_OPTION, vec![json!("eventignore"), json!("")])
            .await;
        let window = window?;
        restored?;

        // Input is not blocking: replay first, clean up in a separate batch.
        call_atomic_logged(self.rpc.as_ref(), change.replay_calls(&buffer, &window)).await?;
        call_atomic_logged(
            self.rpc.as_ref(),
            vec![
                RpcCall::new(methods::SET_CURRENT_WIN, vec![current_win]),
                RpcCall::new(methods::WIN_CLOSE, vec![window, json!(true)]),
            ],
        )
        .await?;
        self.rpc
            .request(
                methods::EXEC_LUA,
                vec![json!(self.settings.engine.cleanup_repeat_lua), json!([])],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Range;

    fn change(range: Range, text: &str) -> ContentChange {
        ContentChange {
            range,
            range_offset: 0,
            range_length: 0,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_columns_become_bytes() {
        let changes = [change(Range::from_coords(1, 2, 1, 3), "X")];
        let out = build_outbound_changes("abc\né€😀z", Eol::Lf, &changes);
        assert_eq!(
            out,
            vec![OutboundChange {
                start_line: 1,
                start_byte: 5,
                end_line: 1,
                end_byte: 9,
                new_lines: vec!["X".to_string()],
            }]
        );
        assert_eq!(out[0].to_value(), json!([1, 5, 1, 9, ["X"]]));
    }

    #[test]
    fn test_text_split_on_document_eol() {
        let changes = [change(Range::from_coords(0, 1, 0, 1), "1\r\n2")];
        let out = build_outbound_changes("ab\r\ncd", Eol::CrLf, &changes);
        assert_eq!(out[0].new_lines, vec!["1", "2"]);
        assert_eq!(out[0].start_byte, 1);
    }

    #[test]
    fn test_missing_line_counts_as_empty() {
        let changes = [change(Range::from_coords(5, 3, 5, 3), "x")];
        let out = build_outbound_changes("ab", Eol::Lf, &changes);
        assert_eq!(out[0].start_byte, 0);
        assert_eq!(out[0].end_byte, 0);
    }
}
