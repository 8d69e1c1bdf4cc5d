use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::completion::CompletionHandle;
use super::SyncEngine;
use crate::diff::{host_edit_ops, line_ranges};
use crate::error::{Result, SyncError};
use crate::host::{DocumentId, EditOptions, HostError};
use crate::rpc::ChangeRecord;

/// Apply one external change record to a whole-buffer line array.
///
/// The engine reports several shapes of batch:
/// 1. a changed line: `[first, first+1)` replaced by new text;
/// 2. a cleared (not deleted) line: `[first, first+1)` replaced by `[""]`;
/// 3. inserted lines: `first == last`;
/// 4. deleted lines: `[first, last)` replaced by nothing;
/// 5. several empty lines deleted: `[first, last)` replaced by `[""]`, where
///    line `first` survives as an empty line.
///
/// `last` is exclusive and may point past the end of the buffer.
pub fn apply_change_record(lines: &mut Vec<String>, record: &ChangeRecord) {
    let first = record.first_line;
    let last = record.last_line;
    let data = &record.line_data;
    let blank = data.len() == 1 && data[0].is_empty();

    if first != last && last == first + 1 && blank {
        if first >= lines.len() {
            lines.resize(first + 1, String::new());
        }
        lines[first].clear();
    } else if first != last && blank {
        let start = first.min(lines.len());
        let end = (start + last.saturating_sub(first + 1)).min(lines.len());
        lines.drain(start..end);
        if first >= lines.len() {
            lines.resize(first + 1, String::new());
        }
        lines[first].clear();
    } else if first != last && data.is_empty() {
        let start = first.min(lines.len());
        let end = last.min(lines.len()).max(start);
        lines.drain(start..end);
    } else if first == last {
        let mut data = data.clone();
        if first > lines.len() {
            data.insert(0, String::new());
        }
        let at = first.min(lines.len());
        lines.splice(at..at, data);
    } else {
        // Changes running past the last line (pasting at the end, say) must
        // land on a new line rather than extend the current one.
        let mut data = data.clone();
        if first >= lines.len() {
            data.insert(0, String::new());
        }
        let start = first.min(lines.len());
        let end = last.min(lines.len()).max(start);
        lines.splice(start..end, data);
    }
}

/// Records of one drain pass folded into a single document edit.
struct DocPass {
    document: DocumentId,
    /// `None` when the document was already closed.
    lines: Option<Vec<String>>,
    records: usize,
}

impl SyncEngine {
    /// Accept a change record from the external engine. Returns whether it
    /// was queued; echoes of our own writes, unknown buffers and empty
    /// insertions are dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_change_record(self: &Arc<Self>, record: ChangeRecord) -> bool {
        debug!(
            "Received buffer change event for buffer {}, tick {}",
            record.buffer, record.tick
        );
        let start_drain = {
            let mut st = self.state();
            let Some(document) = st.buffers.get(&record.buffer).cloned() else {
                debug!("No document for buffer {}", record.buffer);
                return false;
            };
            let skip_tick = st.skip_ticks.get(&record.buffer).copied().unwrap_or(0);
            if skip_tick >= record.tick {
                debug!("Buffer {} skipping tick {}", record.buffer, record.tick);
                return false;
            }
            // Happens after undo.
            if record.first_line == record.last_line && record.line_data.is_empty() {
                debug!("Buffer {} empty change, skipping", record.buffer);
                return false;
            }

            st.completions
                .entry(document.clone())
                .or_default()
                .push_back(CompletionHandle::new());
            st.pending.push_back((document, record));
            !std::mem::replace(&mut st.draining, true)
        };

        if start_drain {
            let engine = Arc::clone(self);
            tokio::spawn(engine.drain());
        }
        true
    }

    async fn drain(self: Arc<Self>) {
        debug!("Applying external edits");
        let started = Instant::now();
        loop {
            let batch: Vec<(DocumentId, ChangeRecord)> = {
                let mut st = self.state();
                if st.pending.is_empty() {
                    st.draining = false;
                    // Every accepted record has been applied, nothing may
                    // stay blocked.
                    for (_, queue) in st.completions.drain() {
                        queue.into_iter().for_each(CompletionHandle::resolve);
                    }
                    break;
                }
                st.pending.drain(..).collect()
            };
            for pass in self.accumulate(batch) {
                self.apply_pass(pass).await;
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= Duration::from_millis(self.settings.inbound.slow_drain_warn_ms) {
            info!("Applying external edits took {:?}", elapsed);
        }
    }

    fn accumulate(&self, batch: Vec<(DocumentId, ChangeRecord)>) -> Vec<DocPass> {
        let mut passes: Vec<DocPass> = Vec::new();
        for (document, record) in batch {
            let idx = match passes.iter().position(|p| p.document == document) {
                Some(idx) => idx,
                None => {
                    let lines = self.host.snapshot(&document).map(|s| s.lines);
                    passes.push(DocPass {
                        document,
                        lines,
                        records: 0,
                    });
                    passes.len() - 1
                }
            };
            let pass = &mut passes[idx];
            debug!("Accumulating edits for {}, buffer {}", pass.document, record.buffer);
            pass.records += 1;
            if let Some(lines) = pass.lines.as_mut() {
                apply_change_record(lines, &record);
            }
        }
        passes
    }

    async fn apply_pass(&self, pass: DocPass) {
        let DocPass {
            document,
            lines,
            records,
        } = pass;

        let outcome = match lines {
            Some(lines) => self.apply_lines(&document, lines).await,
            None => Err(HostError::DocumentClosed(document.clone()).into()),
        };

        // Handles are queued one per record in acceptance order, so the
        // first `records` of them belong to this pass.
        let handles: Vec<CompletionHandle> = {
            let mut st = self.state();
            let queue = st.completions.entry(document.clone()).or_default();
            let count = records.min(queue.len());
            let handles = queue.drain(..count).collect();
            if queue.is_empty() {
                st.completions.remove(&document);
            }
            handles
        };

        match outcome {
            Ok(()) => {
                debug!("Changes successfully applied for {}", document);
                handles.into_iter().for_each(CompletionHandle::resolve);
            }
            Err(e) => {
                warn!("Changes were not applied for {}: {}", document, e);
                handles.into_iter().for_each(CompletionHandle::reject);
            }
        }
    }

    async fn apply_lines(&self, document: &DocumentId, new_lines: Vec<String>) -> Result<()> {
        let snapshot = self
            .host
            .snapshot(document)
            .ok_or_else(|| SyncError::Host(HostError::DocumentClosed(document.clone())))?;

        let ranges = line_ranges(&snapshot.lines, &new_lines);
        if ranges.is_empty() {
            return Ok(());
        }
        let ops = host_edit_ops(&snapshot.lines, &new_lines, &ranges);

        let skip = snapshot.version + 1;
        let previous_skip = self.state().skip_versions.insert(document.clone(), skip);

        let cursor_before = self.host.cursor(document);
        if let Err(e) = self.host.apply_edit(document, ops, EditOptions::merged()).await {
            warn!("Host refused edit for {}: {}", document, e);
            // The version did not move; the next real edit lands on `skip`.
            let mut st = self.state();
            if st.skip_versions.get(document) == Some(&skip) {
                match previous_skip {
                    Some(version) => st.skip_versions.insert(document.clone(), version),
                    None => st.skip_versions.remove(document),
                };
            }
            return Err(SyncError::rejected(document));
        }

        // A replace can leave the new text selected: collapse it onto its
        // active end. Otherwise the edit may have dragged the cursor, and
        // external cursor sync expects it where it was.
        match self.host.selection(document) {
            Some(selection) if !selection.is_empty() => self.host.set_cursor(document, selection.active),
            _ => {
                if let Some(cursor) = cursor_before {
                    self.host.set_cursor(document, cursor);
                }
            }
        }
        let cursor_after = self.host.cursor(document);
        let text_after = self.host.snapshot(document).map(|s| s.text());

        let mut st = self.state();
        if let Some(cursor) = cursor_after {
            st.cursor_hints.insert(document.clone(), cursor);
        }
        if let Some(text) = text_after {
            st.known_content.insert(document.clone(), text);
        }
        Ok(())
    }
}
