//! The host editor seam: document reads, edits, change events.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::position::{char_to_byte, Position, Range};

/// Stable identity of a host document (usually its URI).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Eol {
    #[default]
    Lf,
    CrLf,
}

impl Eol {
    pub fn as_str(self) -> &'static str {
        match self {
            Eol::Lf => "\n",
            Eol::CrLf => "\r\n",
        }
    }

    pub fn split(self, text: &str) -> Vec<String> {
        text.split(self.as_str()).map(str::to_string).collect()
    }
}

/// Point-in-time read of a host document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub version: u64,
    pub eol: Eol,
    pub lines: Vec<String>,
}

impl DocumentSnapshot {
    pub fn from_text(version: u64, eol: Eol, text: &str) -> Self {
        Self {
            version,
            eol,
            lines: eol.split(text),
        }
    }

    pub fn text(&self) -> String {
        self.lines.join(self.eol.as_str())
    }
}

/// One sub-operation of a host edit. Every position refers to the document
/// as it was before the edit; multi-line text uses `\n` and the host
/// normalizes it to the document's line ending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEditOp {
    Delete(Range),
    Insert { at: Position, text: String },
    Replace { range: Range, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditOptions {
    pub undo_stop_before: bool,
    pub undo_stop_after: bool,
}

impl EditOptions {
    /// Merge the edit into the surrounding undo step.
    pub fn merged() -> Self {
        Self {
            undo_stop_before: false,
            undo_stop_after: false,
        }
    }
}

impl Default for EditOptions {
    fn default() -> Self {
        Self {
            undo_stop_before: true,
            undo_stop_after: true,
        }
    }
}

/// A single content change inside a host change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
    /// Replaced range, in the document as it was before the change.
    pub range: Range,
    /// Offset of `range.start` in the whole document, in host units.
    pub range_offset: usize,
    /// Length of the replaced text in host units.
    pub range_length: usize,
    pub text: String,
}

/// Host notification that a document changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostChangeEvent {
    pub document: DocumentId,
    /// Version after the change.
    pub version: u64,
    pub eol: Eol,
    pub changes: Vec<ContentChange>,
    /// Full document text after the change.
    pub text: String,
}

/// Primary selection of an editor. `active` is where the cursor sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Position,
    pub active: Position,
}

impl Selection {
    pub fn collapsed(position: Position) -> Self {
        Self {
            anchor: position,
            active: position,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.active
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("document {0} is closed")]
    DocumentClosed(DocumentId),

    #[error("edit rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait HostEditor: Send + Sync {
    /// Current contents of the document, `None` once it is closed.
    fn snapshot(&self, document: &DocumentId) -> Option<DocumentSnapshot>;

    /// Apply all `ops` as one edit. The host bumps the document version by
    /// one on success.
    async fn apply_edit(
        &self,
        document: &DocumentId,
        ops: Vec<HostEditOp>,
        options: EditOptions,
    ) -> Result<(), HostError>;

    /// Primary cursor of the editor showing `document`.
    fn cursor(&self, document: &DocumentId) -> Option<Position>;

    /// Primary selection of the editor showing `document`. Hosts without
    /// selections report the cursor as an empty one.
    fn selection(&self, document: &DocumentId) -> Option<Selection> {
        self.cursor(document).map(Selection::collapsed)
    }

    /// Move the cursor and collapse any selection onto it.
    fn set_cursor(&self, document: &DocumentId, position: Position);

    /// Cursor of the active editor, only if it shows `document`.
    fn active_cursor(&self, document: &DocumentId) -> Option<Position>;

    fn is_insert_mode(&self) -> bool;
}

/// Apply host edit operations to a plain line array, resolving positions the
/// way hosts do: lines past the end land at the end of the document and
/// columns past the end of a line land at the end of that line.
pub fn apply_edit_ops<S: AsRef<str>>(lines: &[S], ops: &[HostEditOp]) -> Vec<String> {
    let lines: Vec<&str> = lines.iter().map(AsRef::as_ref).collect();
    let mut text = lines.join("\n");
    let total = text.len();

    let mut starts = Vec::with_capacity(lines.len());
    let mut acc = 0;
    for line in &lines {
        starts.push(acc);
        acc += line.len() + 1;
    }
    let offset = |pos: Position| -> usize {
        if pos.line >= lines.len() {
            return total;
        }
        starts[pos.line] + char_to_byte(lines[pos.line], pos.character)
    };

    // (start, end, is_insert, order, text)
    let mut edits: Vec<(usize, usize, bool, usize, &str)> = ops
        .iter()
        .enumerate()
        .map(|(idx, op)| match op {
            HostEditOp::Delete(range) => (offset(range.start), offset(range.end), false, idx, ""),
            HostEditOp::Insert { at, text } => {
                let at = offset(*at);
                (at, at, true, idx, text.as_str())
            }
            HostEditOp::Replace { range, text } => (offset(range.start), offset(range.end), false, idx, text.as_str()),
        })
        .collect();

    // Back to front so earlier offsets stay valid. At the same offset,
    // deletions go first and inserts keep their relative order.
    edits.sort_by(|a, b| b.0.cmp(&a.0).then(a.2.cmp(&b.2)).then(b.3.cmp(&a.3)));
    for (start, end, _, _, insert) in edits {
        text.replace_range(start..end.max(start), insert);
    }
    text.split('\n').map(str::to_string).collect()
}
