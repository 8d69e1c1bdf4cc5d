//! Conversion between host character offsets and external-engine byte offsets.
//!
//! The host counts columns in UTF-16 code units: a code point outside the
//! BMP occupies two units. The external engine addresses columns in UTF-8
//! bytes. Every function here is total; offsets past the end of a line clamp
//! to the line's length, and an offset that lands inside a code point rounds
//! up to the end of that code point.

use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

/// A position in host units: zero-based line, UTF-16 column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

/// A host range. `start <= end` is expected but not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn from_coords(start_line: usize, start_char: usize, end_line: usize, end_char: usize) -> Self {
        Self {
            start: Position::new(start_line, start_char),
            end: Position::new(end_line, end_char),
        }
    }

    /// Inclusive on both ends, like the host's own range check.
    pub fn contains(&self, pos: Position) -> bool {
        self.start <= pos && pos <= self.end
    }

    pub fn is_single_line(&self) -> bool {
        self.start.line == self.end.line
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Convert a UTF-16 column in `line` to a UTF-8 byte column.
pub fn char_to_byte(line: &str, char_offset: usize) -> usize {
    let mut units = 0;
    let mut bytes = 0;
    for ch in line.chars() {
        if units >= char_offset {
            break;
        }
        units += ch.len_utf16();
        bytes += ch.len_utf8();
    }
    bytes
}

/// Convert a UTF-8 byte column in `line` to a UTF-16 column.
pub fn byte_to_char(line: &str, byte_offset: usize) -> usize {
    let mut units = 0;
    let mut bytes = 0;
    for ch in line.chars() {
        if bytes >= byte_offset {
            break;
        }
        bytes += ch.len_utf8();
        units += ch.len_utf16();
    }
    units
}

/// Length of `text` in host units.
pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

/// Convert a display column reported by the external engine into a host
/// column. Tabs advance to the next multiple of `tab_size`; everything else
/// advances by its display width, so double-width characters take two
/// screen cells.
pub fn editor_col_from_screen_col(line: &str, screen_col: usize, tab_size: usize) -> usize {
    if screen_col == 0 || line.is_empty() {
        return 0;
    }
    let tab_size = tab_size.max(1);
    let mut units = 0;
    let mut col = 0;
    for ch in line.chars() {
        if col >= screen_col {
            break;
        }
        if ch == '\t' {
            col += tab_size - (col % tab_size);
        } else {
            col += ch.width().unwrap_or(0);
        }
        units += ch.len_utf16();
    }
    units
}

/// Convert an external `(line, byte)` position into host units using the
/// text of that line.
pub fn to_host_position(line_text: &str, external: Position) -> Position {
    Position::new(external.line, byte_to_char(line_text, external.character))
}

/// Convert a host position into an external `(line, byte)` position.
pub fn to_external_position(line_text: &str, host: Position) -> Position {
    Position::new(host.line, char_to_byte(line_text, host.character))
}
