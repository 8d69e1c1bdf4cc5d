//! Line-level and character-level diffing between the host text and the
//! line array rebuilt from external change records.

use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, DiffOp};

use crate::host::HostEditOp;
use crate::position::{utf16_len, Position, Range};

/// Column used to address "the end of the line" regardless of its length.
/// Hosts clamp columns past the end of a line.
pub const LINE_END: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeKind {
    Changed,
    Added,
    Removed,
}

/// One contiguous difference. `start..=end` indexes the old lines and
/// `new_start..=new_end` the new lines. An `Added` range inserts before old
/// line `start` and covers no old lines; a `Removed` range covers no new
/// lines and `new_start` is where the removed block used to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRange {
    pub kind: RangeKind,
    pub start: usize,
    pub end: usize,
    pub new_start: usize,
    pub new_end: usize,
}

impl EditRange {
    /// True when the range maps exactly one old line to one new line.
    pub fn is_single_line(&self) -> bool {
        self.kind == RangeKind::Changed && self.start == self.end && self.new_start == self.new_end
    }
}

/// A delete/insert run that has not hit an equal block yet.
struct Run {
    old_start: usize,
    new_start: usize,
    deleted: usize,
    inserted: usize,
}

impl Run {
    fn into_range(self) -> EditRange {
        match (self.deleted, self.inserted) {
            (0, inserted) => EditRange {
                kind: RangeKind::Added,
                start: self.old_start,
                end: self.old_start,
                new_start: self.new_start,
                new_end: self.new_start + inserted - 1,
            },
            (deleted, 0) => EditRange {
                kind: RangeKind::Removed,
                start: self.old_start,
                end: self.old_start + deleted - 1,
                new_start: self.new_start,
                new_end: self.new_start,
            },
            (deleted, inserted) => EditRange {
                kind: RangeKind::Changed,
                start: self.old_start,
                end: self.old_start + deleted - 1,
                new_start: self.new_start,
                new_end: self.new_start + inserted - 1,
            },
        }
    }
}

/// Compute the ordered, non-overlapping line ranges turning `old` into `new`.
///
/// Adjacent delete and insert blocks fold into a single `Changed` range, so
/// a one-line substitution never shows up as a remove/add pair.
pub fn line_ranges<S: AsRef<str>>(old: &[S], new: &[S]) -> Vec<EditRange> {
    let old: Vec<&str> = old.iter().map(AsRef::as_ref).collect();
    let new: Vec<&str> = new.iter().map(AsRef::as_ref).collect();

    let mut ranges = Vec::new();
    let mut run: Option<Run> = None;
    // Op indices are not reliable next to equal blocks; positions come
    // from the running op lengths instead.
    let mut old_pos = 0;
    let mut new_pos = 0;

    for op in capture_diff_slices(Algorithm::Myers, &old, &new) {
        let (deleted, inserted) = match op {
            DiffOp::Equal { len, .. } => {
                if let Some(run) = run.take() {
                    ranges.push(run.into_range());
                }
                old_pos += len;
                new_pos += len;
                continue;
            }
            DiffOp::Delete { old_len, .. } => (old_len, 0),
            DiffOp::Insert { new_len, .. } => (0, new_len),
            DiffOp::Replace { old_len, new_len, .. } => (old_len, new_len),
        };
        let run = run.get_or_insert(Run {
            old_start: old_pos,
            new_start: new_pos,
            deleted: 0,
            inserted: 0,
        });
        run.deleted += deleted;
        run.inserted += inserted;
        old_pos += deleted;
        new_pos += inserted;
    }
    if let Some(run) = run {
        ranges.push(run.into_range());
    }
    ranges
}

/// Replay `ranges` over `old` in line space.
pub fn apply_ranges<S: AsRef<str>>(old: &[S], new: &[S], ranges: &[EditRange]) -> Vec<String> {
    let mut out = Vec::with_capacity(new.len());
    let mut cursor = 0;
    for range in ranges {
        out.extend(old[cursor..range.start].iter().map(|l| l.as_ref().to_string()));
        match range.kind {
            RangeKind::Added => {
                out.extend(new[range.new_start..=range.new_end].iter().map(|l| l.as_ref().to_string()));
                cursor = range.start;
            }
            RangeKind::Removed => {
                cursor = range.end + 1;
            }
            RangeKind::Changed => {
                out.extend(new[range.new_start..=range.new_end].iter().map(|l| l.as_ref().to_string()));
                cursor = range.end + 1;
            }
        }
    }
    out.extend(old[cursor..].iter().map(|l| l.as_ref().to_string()));
    out
}

/// A sub-line edit. Columns are host units relative to the original line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharOp {
    Delete { from: usize, to: usize },
    Insert { at: usize, text: String },
}

/// Character-level script turning `old` into `new` within one line.
pub fn char_ops(old: &str, new: &str) -> Vec<CharOp> {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();
    let units = |chars: &[char]| chars.iter().map(|c| c.len_utf16()).sum::<usize>();

    let mut ops = Vec::new();
    let mut col = 0;
    let mut old_pos = 0;
    let mut new_pos = 0;
    for op in capture_diff_slices(Algorithm::Myers, &old_chars, &new_chars) {
        let (deleted, inserted) = match op {
            DiffOp::Equal { len, .. } => {
                col += units(&old_chars[old_pos..old_pos + len]);
                old_pos += len;
                new_pos += len;
                continue;
            }
            DiffOp::Delete { old_len, .. } => (old_len, 0),
            DiffOp::Insert { new_len, .. } => (0, new_len),
            DiffOp::Replace { old_len, new_len, .. } => (old_len, new_len),
        };
        if deleted > 0 {
            let width = units(&old_chars[old_pos..old_pos + deleted]);
            ops.push(CharOp::Delete {
                from: col,
                to: col + width,
            });
            col += width;
        }
        if inserted > 0 {
            ops.push(CharOp::Insert {
                at: col,
                text: new_chars[new_pos..new_pos + inserted].iter().collect(),
            });
        }
        old_pos += deleted;
        new_pos += inserted;
    }
    ops
}

/// Translate line ranges into host edit operations addressed against
/// `old_lines`, the host document as it is right before the edit.
pub fn host_edit_ops<S: AsRef<str>>(old_lines: &[S], new_lines: &[S], ranges: &[EditRange]) -> Vec<HostEditOp> {
    let line_count = old_lines.len();
    let mut ops = Vec::new();

    for range in ranges {
        match range.kind {
            RangeKind::Removed => {
                if range.end + 1 >= line_count && range.start > 0 {
                    // Trailing block: eat the line break in front of it
                    // instead of the one after it.
                    let prev = range.start - 1;
                    let prev_len = utf16_len(old_lines[prev].as_ref());
                    ops.push(HostEditOp::Delete(Range::from_coords(prev, prev_len, range.end, LINE_END)));
                } else {
                    ops.push(HostEditOp::Delete(Range::from_coords(range.start, 0, range.end + 1, 0)));
                }
            }
            RangeKind::Changed => {
                let old_text = join(&old_lines[range.start..=range.end]);
                let new_text = join(&new_lines[range.new_start..=range.new_end]);
                if new_text.len() > old_text.len() && new_text.starts_with(&old_text) {
                    // Pure append; a replace here would leave the appended
                    // text selected in some hosts.
                    let end_char = utf16_len(old_lines[range.end].as_ref());
                    ops.push(HostEditOp::Insert {
                        at: Position::new(range.end, end_char),
                        text: new_text[old_text.len()..].to_string(),
                    });
                } else if range.is_single_line() {
                    let line = range.start;
                    ops.extend(char_ops(&old_text, &new_text).into_iter().map(|op| match op {
                        CharOp::Delete { from, to } => HostEditOp::Delete(Range::from_coords(line, from, line, to)),
                        CharOp::Insert { at, text } => HostEditOp::Insert {
                            at: Position::new(line, at),
                            text,
                        },
                    }));
                } else {
                    ops.push(HostEditOp::Replace {
                        range: Range::from_coords(range.start, 0, range.end, LINE_END),
                        text: new_text,
                    });
                }
            }
            RangeKind::Added => {
                let mut text: Vec<&str> = new_lines[range.new_start..=range.new_end]
                    .iter()
                    .map(AsRef::as_ref)
                    .collect();
                if range.start >= line_count {
                    let padding = range.start + 1 - line_count.max(1);
                    let mut padded = vec![""; padding];
                    padded.append(&mut text);
                    text = padded;
                } else {
                    text.push("");
                }
                ops.push(HostEditOp::Insert {
                    at: Position::new(range.start, 0),
                    text: text.join("\n"),
                });
            }
        }
    }
    ops
}

fn join<S: AsRef<str>>(lines: &[S]) -> String {
    lines.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("\n")
}
