// Conversions between row/column positions and flat character offsets.
//
// Offsets count Unicode scalar values, with one extra unit per line break.
// Engines that count UTF-16 code units disagree on text outside the Basic
// Multilingual Plane: an emoji is one unit here and two there.

use serde::{Deserialize, Serialize};

/// A row/column cursor position inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Position {
    pub const fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

fn line_len<S: AsRef<str>>(line: &S) -> usize {
    line.as_ref().chars().count()
}

/// Flat offset of `(row, col)`: every line before `row` contributes its
/// length plus one for the newline.
pub fn offset_of<S: AsRef<str>>(lines: &[S], row: usize, col: usize) -> usize {
    lines.iter().take(row).map(|line| line_len(line) + 1).sum::<usize>() + col
}

/// Inverse of [`offset_of`]. Returns `None` when `offset` lies past the end
/// of the text.
pub fn position_of<S: AsRef<str>>(lines: &[S], offset: usize) -> Option<Position> {
    if lines.is_empty() {
        return (offset == 0).then_some(Position::new(0, 0));
    }

    let mut remaining = offset;
    for (row, line) in lines.iter().enumerate() {
        let len = line_len(line);
        if remaining <= len {
            return Some(Position::new(row, remaining));
        }
        remaining -= len + 1;
    }
    None
}

/// Total addressable length: all characters plus the separating newlines.
pub fn total_len<S: AsRef<str>>(lines: &[S]) -> usize {
    if lines.is_empty() {
        return 0;
    }
    lines.iter().map(line_len).sum::<usize>() + lines.len() - 1
}

/// Splits text the way an editor buffer stores it: a trailing newline yields
/// a final empty line.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n').collect()
}
