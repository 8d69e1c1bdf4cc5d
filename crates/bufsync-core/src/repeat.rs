//! Capture of the most recent contiguous insert-mode change, so the external
//! engine's "repeat last change" replays what was typed on the host side.

use serde_json::{json, Value};

use crate::host::{ContentChange, Eol};
use crate::position::{char_to_byte, utf16_len, Position};
use crate::rpc::{methods, RpcCall};

/// Net effect of a streak of insert-mode edits: `range_length` host units
/// starting at `range_offset` were replaced by `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatChange {
    pub range_length: usize,
    pub range_offset: usize,
    pub text: String,
    pub eol: Eol,
}

impl RepeatChange {
    pub fn from_change(change: &ContentChange, eol: Eol) -> Self {
        Self {
            range_length: change.range_length,
            range_offset: change.range_offset,
            text: change.text.clone(),
            eol,
        }
    }

    fn end_offset(&self) -> usize {
        self.range_offset + utf16_len(&self.text)
    }

    /// Whether `change` starts inside or right after the accumulated text,
    /// or deletes backwards into it.
    pub fn is_subsequent_to(&self, change: &ContentChange) -> bool {
        let start = self.range_offset;
        let end = self.end_offset();
        if change.range_offset >= start && change.range_offset <= end {
            return true;
        }
        change.range_offset < start && change.range_offset + change.range_length >= start
    }

    /// Fold a subsequent `change` into the accumulated one.
    pub fn accumulate(&mut self, change: &ContentChange) {
        let start = self.range_offset;
        let text_len = utf16_len(&self.text);
        let end = start + text_len;
        let change_end = change.range_offset + change.range_length;
        let keep_from = change_end.saturating_sub(start).min(text_len);

        if change.range_offset >= start {
            // Replay only deletes backwards, so forward deletion past the
            // insertion leaves `range_length` alone.
            let before = slice_utf16(&self.text, 0, change.range_offset - start);
            let after = slice_utf16(&self.text, keep_from, text_len);
            self.text = format!("{before}{}{after}", change.text);
        } else {
            // Deleted text in front of the insertion, or past its end,
            // belonged to the original document.
            let overflow = change_end.saturating_sub(end);
            let after = slice_utf16(&self.text, keep_from, text_len);
            self.text = format!("{}{after}", change.text);
            self.range_length += (start - change.range_offset) + overflow;
            self.range_offset = change.range_offset;
        }
    }

    /// Keys the external engine should see in insert mode.
    pub fn keys(&self) -> String {
        self.text.split(self.eol.as_str()).collect::<Vec<_>>().join("\n")
    }

    /// Calls that replay this change inside the scratch `buffer`/`window`:
    /// prefill text to delete, type the insertion, then the backspaces.
    pub fn replay_calls(&self, buffer: &Value, window: &Value) -> Vec<RpcCall> {
        let mut calls = Vec::new();
        if self.range_length > 0 {
            let stub = "x".repeat(self.range_length);
            calls.push(RpcCall::new(
                methods::BUF_SET_LINES,
                vec![buffer.clone(), json!(0), json!(0), json!(false), json!([stub])],
            ));
            calls.push(RpcCall::new(
                methods::WIN_SET_CURSOR,
                vec![window.clone(), json!([1, self.range_length])],
            ));
        }
        calls.push(RpcCall::new(
            methods::FEEDKEYS,
            vec![json!(self.keys()), json!("i"), json!(false)],
        ));
        if self.range_length > 0 {
            calls.push(RpcCall::new(methods::INPUT, vec![json!("<BS>".repeat(self.range_length))]));
        }
        calls
    }
}

/// Whether `change` touches the cursor: either its range contains it, or a
/// single-line insertion ends at or after it.
pub fn is_cursor_change(change: &ContentChange, cursor: Position, eol: Eol) -> bool {
    if change.range.contains(cursor) {
        return true;
    }
    if change.range.is_single_line() && !change.text.is_empty() {
        let lines: Vec<&str> = change.text.split(eol.as_str()).collect();
        let new_end_line = change.range.start.line + lines.len() - 1;
        let last_len = lines.last().map(|l| utf16_len(l)).unwrap_or(0);
        let new_end_char = change.range.end.character + last_len;
        if new_end_line >= cursor.line && new_end_char >= cursor.character {
            return true;
        }
    }
    false
}

fn slice_utf16(text: &str, from: usize, to: usize) -> &str {
    let from = char_to_byte(text, from);
    let to = char_to_byte(text, to).max(from);
    &text[from..to]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Range;

    fn change(offset: usize, length: usize, text: &str) -> ContentChange {
        ContentChange {
            range: Range::from_coords(0, offset, 0, offset + length),
            range_offset: offset,
            range_length: length,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_typing_accumulates() {
        let mut acc = RepeatChange::from_change(&change(10, 0, "a"), Eol::Lf);
        for (offset, text) in [(11, "b"), (12, "c")] {
            let next = change(offset, 0, text);
            assert!(acc.is_subsequent_to(&next));
            acc.accumulate(&next);
        }
        assert_eq!(acc.text, "abc");
        assert_eq!(acc.range_offset, 10);
        assert_eq!(acc.range_length, 0);
    }

    #[test]
    fn test_backspace_inside_and_past_insertion() {
        let mut acc = RepeatChange::from_change(&change(10, 0, "ab"), Eol::Lf);
        acc.accumulate(&change(11, 1, ""));
        assert_eq!(acc.text, "a");
        acc.accumulate(&change(10, 1, ""));
        assert_eq!(acc.text, "");
        assert_eq!(acc.range_length, 0);

        let backspace = change(9, 1, "");
        assert!(acc.is_subsequent_to(&backspace));
        acc.accumulate(&backspace);
        assert_eq!(acc.text, "");
        assert_eq!(acc.range_offset, 9);
        assert_eq!(acc.range_length, 1);
    }

    #[test]
    fn test_forward_delete_past_insertion_keeps_range_length() {
        let mut acc = RepeatChange::from_change(&change(10, 2, "ab"), Eol::Lf);
        // Delete "b" and one more character of the original text.
        let delete = change(11, 2, "");
        assert!(acc.is_subsequent_to(&delete));
        acc.accumulate(&delete);

        assert_eq!(acc.text, "a");
        assert_eq!(acc.range_offset, 10);
        assert_eq!(acc.range_length, 2);
    }

    #[test]
    fn test_distant_change_is_not_subsequent() {
        let acc = RepeatChange::from_change(&change(10, 0, "ab"), Eol::Lf);
        assert!(!acc.is_subsequent_to(&change(20, 0, "x")));
        assert!(!acc.is_subsequent_to(&change(5, 2, "x")));
    }

    #[test]
    fn test_cursor_change_detection() {
        let typed = change(3, 0, "x");
        assert!(is_cursor_change(&typed, Position::new(0, 3), Eol::Lf));
        assert!(is_cursor_change(&typed, Position::new(0, 4), Eol::Lf));
        assert!(!is_cursor_change(&typed, Position::new(0, 9), Eol::Lf));
        assert!(!is_cursor_change(&typed, Position::new(2, 0), Eol::Lf));
    }

    #[test]
    fn test_replay_calls_with_deletion() {
        let acc = RepeatChange {
            range_length: 2,
            range_offset: 0,
            text: "hi\r\nthere".to_string(),
            eol: Eol::CrLf,
        };
        let calls = acc.replay_calls(&json!(7), &json!(1000));
        let names: Vec<&str> = calls.iter().map(|c| c.method.as_str()).collect();
        assert_eq!(
            names,
            vec![methods::BUF_SET_LINES, methods::WIN_SET_CURSOR, methods::FEEDKEYS, methods::INPUT]
        );
        assert_eq!(calls[0].args[4], json!(["xx"]));
        assert_eq!(calls[2].args[0], json!("hi\nthere"));
        assert_eq!(calls[3].args[0], json!("<BS><BS>"));
    }

    #[test]
    fn test_replay_calls_pure_insert() {
        let acc = RepeatChange::from_change(&change(0, 0, "abc"), Eol::Lf);
        let calls = acc.replay_calls(&json!(7), &json!(1000));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, methods::FEEDKEYS);
    }
}
