// Client-side binding between a local text buffer and an OT document handle.
//
// Local change events become OT insert/remove operations; remote operations
// are replayed into the buffer with the local listener suppressed so they are
// not echoed back into the OT stream.

pub mod tokens;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use self::tokens::{LineTokens, TokenStateCache};
use crate::offset::{offset_of, position_of, split_lines, total_len, Position};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditorError {
    #[error("unknown delta action `{0}`")]
    UnknownAction(String),
    #[error("malformed delta: {0}")]
    MalformedDelta(String),
    #[error("offset {offset} is outside the document (length {len})")]
    OffsetOutOfRange { offset: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaAction {
    InsertText(String),
    RemoveText(String),
    InsertLines(Vec<String>),
    RemoveLines(Vec<String>),
}

/// A change event raised by the local buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub action: DeltaAction,
    pub range: Range,
}

#[derive(Deserialize)]
struct RawDelta {
    action: String,
    range: Range,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    lines: Option<Vec<String>>,
}

impl Delta {
    pub fn insert_text(range: Range, text: impl Into<String>) -> Self {
        Self { action: DeltaAction::InsertText(text.into()), range }
    }

    pub fn remove_text(range: Range, text: impl Into<String>) -> Self {
        Self { action: DeltaAction::RemoveText(text.into()), range }
    }

    /// Decodes the widget's JSON change event
    /// (`{action, range: {start, end}, text | lines}`).
    pub fn from_json(value: &Value) -> Result<Self, EditorError> {
        let raw = RawDelta::deserialize(value)
            .map_err(|error| EditorError::MalformedDelta(error.to_string()))?;
        let missing = |field: &str| EditorError::MalformedDelta(format!("{} needs `{field}`", raw.action));

        let action = match raw.action.as_str() {
            "insertText" => DeltaAction::InsertText(raw.text.clone().ok_or_else(|| missing("text"))?),
            "removeText" => DeltaAction::RemoveText(raw.text.clone().ok_or_else(|| missing("text"))?),
            "insertLines" => {
                DeltaAction::InsertLines(raw.lines.clone().ok_or_else(|| missing("lines"))?)
            }
            "removeLines" => {
                DeltaAction::RemoveLines(raw.lines.clone().ok_or_else(|| missing("lines"))?)
            }
            other => return Err(EditorError::UnknownAction(other.to_string())),
        };

        Ok(Self { action, range: raw.range })
    }

    /// Translates the delta into an OT operation. `lines` is the buffer
    /// content after the change; text before `range.start` is unaffected by
    /// either inserts or removes, so the start offset is stable.
    pub fn to_op<S: AsRef<str>>(&self, lines: &[S]) -> OtOp {
        let pos = offset_of(lines, self.range.start.row, self.range.start.column);
        match &self.action {
            DeltaAction::InsertText(text) => OtOp::Insert { pos, text: text.clone() },
            DeltaAction::RemoveText(text) => OtOp::Remove { pos, len: text.chars().count() },
            DeltaAction::InsertLines(inserted) => {
                OtOp::Insert { pos, text: format!("{}\n", inserted.join("\n")) }
            }
            DeltaAction::RemoveLines(removed) => {
                OtOp::Remove { pos, len: removed.join("\n").chars().count() + 1 }
            }
        }
    }
}

/// Operation sent to the OT document handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtOp {
    Insert { pos: usize, text: String },
    Remove { pos: usize, len: usize },
}

/// Operation raised by the OT document handle for a remote change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    Insert { pos: usize, text: String },
    Remove { pos: usize, len: usize },
    /// Whole-document reload from the handle's snapshot.
    Refresh,
}

/// The local editable text widget.
///
/// Mutations return the change events the widget raised while applying
/// them; real widgets fire these synchronously into their change listener.
pub trait EditBuffer {
    fn lines(&self) -> Vec<String>;

    fn text(&self) -> String {
        self.lines().join("\n")
    }

    fn insert(&mut self, at: Position, text: &str) -> Vec<Delta>;

    fn remove(&mut self, range: Range) -> Vec<Delta>;

    fn set_text(&mut self, text: &str) -> Vec<Delta>;

    fn clear_change_listener(&mut self);
}

/// Handle onto one document held by the OT engine.
pub trait OtDocument {
    fn insert(&mut self, pos: usize, text: &str);

    fn remove(&mut self, pos: usize, len: usize);

    /// Canonical text of the document.
    fn snapshot(&self) -> String;

    /// Drops the insert/remove/refresh hooks pointing at this binding.
    fn clear_hooks(&mut self);
}

pub struct EditorBinding<B: EditBuffer, D: OtDocument> {
    buffer: B,
    doc: D,
    suppress: bool,
    attached: bool,
    desyncs: usize,
    first_dirty_row: Option<usize>,
}

impl<B: EditBuffer, D: OtDocument> EditorBinding<B, D> {
    /// Attaches `buffer` to `doc`, loading the document's current text.
    pub fn attach(buffer: B, doc: D) -> Self {
        let mut binding =
            Self { buffer, doc, suppress: false, attached: true, desyncs: 0, first_dirty_row: None };
        binding.reload();
        binding
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn doc(&self) -> &D {
        &self.doc
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn desync_count(&self) -> usize {
        self.desyncs
    }

    /// Lowest buffer row changed since the last call, for tokenizer cache
    /// invalidation.
    pub fn take_first_dirty_row(&mut self) -> Option<usize> {
        self.first_dirty_row.take()
    }

    /// Tokenizes the buffer through `cache`, first dropping cached rows
    /// from the lowest row touched since the previous call.
    pub fn retokenize<T, S, F>(
        &mut self,
        cache: &mut TokenStateCache<T, S>,
        initial: S,
        tokenize: F,
    ) -> Vec<Vec<T>>
    where
        T: Clone,
        S: Clone + PartialEq,
        F: FnMut(&str, &S) -> LineTokens<T, S>,
    {
        if let Some(row) = self.take_first_dirty_row() {
            cache.invalidate_from(row);
        }
        cache.tokenize_all(&self.buffer.lines(), initial, tokenize)
    }

    /// Local change listener. Returns the operation sent to the document, or
    /// `None` when suppressed or detached.
    pub fn handle_local_delta(&mut self, delta: &Delta) -> Option<OtOp> {
        if self.suppress || !self.attached {
            return None;
        }

        let op = delta.to_op(&self.buffer.lines());
        match &op {
            OtOp::Insert { pos, text } => self.doc.insert(*pos, text),
            OtOp::Remove { pos, len } => self.doc.remove(*pos, *len),
        }
        self.mark_dirty(delta.range.start.row);
        self.check_consistency();
        Some(op)
    }

    /// Decodes a JSON change event and feeds it to [`Self::handle_local_delta`].
    pub fn handle_local_event(&mut self, event: &Value) -> Result<Option<OtOp>, EditorError> {
        let delta = Delta::from_json(event)?;
        Ok(self.handle_local_delta(&delta))
    }

    /// Applies a remote operation to the buffer without echoing it back.
    pub fn handle_remote(&mut self, op: RemoteOp) -> Result<(), EditorError> {
        if !self.attached {
            return Ok(());
        }

        let lines = self.buffer.lines();
        let locate = |offset: usize| {
            position_of(&lines, offset)
                .ok_or(EditorError::OffsetOutOfRange { offset, len: total_len(&lines) })
        };

        let events = match op {
            RemoteOp::Insert { pos, text } => {
                let at = locate(pos)?;
                self.mark_dirty(at.row);
                self.with_suppressed(|buffer| buffer.insert(at, &text))
            }
            RemoteOp::Remove { pos, len } => {
                let end = pos.checked_add(len).ok_or(EditorError::OffsetOutOfRange {
                    offset: pos,
                    len: total_len(&lines),
                })?;
                let range = Range::new(locate(pos)?, locate(end)?);
                self.mark_dirty(range.start.row);
                self.with_suppressed(|buffer| buffer.remove(range))
            }
            RemoteOp::Refresh => {
                self.reload();
                return Ok(());
            }
        };
        debug!(events = events.len(), "applied remote operation");

        self.check_consistency();
        Ok(())
    }

    /// Compares buffer text against the document snapshot. A mismatch means
    /// the mapping or the engine diverged; it is reported, never repaired.
    pub fn check_consistency(&mut self) -> bool {
        let local = self.buffer.text();
        let canonical = self.doc.snapshot();
        if local == canonical {
            return true;
        }

        self.desyncs += 1;
        error!(
            local_len = local.chars().count(),
            canonical_len = canonical.chars().count(),
            desyncs = self.desyncs,
            "editor buffer diverged from OT document snapshot"
        );
        false
    }

    /// Removes the local listener and the document hooks. Idempotent.
    pub fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.buffer.clear_change_listener();
        self.doc.clear_hooks();
        self.attached = false;
    }

    fn reload(&mut self) {
        let snapshot = self.doc.snapshot();
        self.with_suppressed(|buffer| buffer.set_text(&snapshot));
        self.mark_dirty(0);
        self.check_consistency();
    }

    fn with_suppressed(&mut self, apply: impl FnOnce(&mut B) -> Vec<Delta>) -> Vec<Delta> {
        self.suppress = true;
        let events = apply(&mut self.buffer);
        for event in &events {
            // Widgets fire change events synchronously; replay them through
            // the listener, which must ignore them.
            let echoed = self.handle_local_delta(event);
            debug_assert!(echoed.is_none());
        }
        self.suppress = false;
        events
    }

    fn mark_dirty(&mut self, row: usize) {
        self.first_dirty_row = Some(self.first_dirty_row.map_or(row, |current| current.min(row)));
    }
}

/// In-memory [`EditBuffer`] storing lines, useful for headless clients.
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    lines: Vec<String>,
    listening: bool,
}

impl LineBuffer {
    pub fn new(text: &str) -> Self {
        Self { lines: split_lines(text).into_iter().map(str::to_owned).collect(), listening: true }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Replaces chars `start..end`, clamped to the buffer.
    fn splice(&mut self, start: usize, end: usize, insert: &str) {
        let text = self.lines.join("\n");
        let mut chars: Vec<char> = text.chars().collect();
        let end = end.min(chars.len());
        chars.splice(start.min(end)..end, insert.chars());
        let joined: String = chars.into_iter().collect();
        self.lines = split_lines(&joined).into_iter().map(str::to_owned).collect();
    }
}

impl EditBuffer for LineBuffer {
    fn lines(&self) -> Vec<String> {
        self.lines.clone()
    }

    fn insert(&mut self, at: Position, text: &str) -> Vec<Delta> {
        let start = offset_of(&self.lines, at.row, at.column);
        self.splice(start, start, text);
        let end = position_of(&self.lines, start + text.chars().count()).unwrap_or(at);
        vec![Delta::insert_text(Range::new(at, end), text)]
    }

    fn remove(&mut self, range: Range) -> Vec<Delta> {
        let len = total_len(&self.lines);
        let (from, to) = (range.start.min(range.end), range.start.max(range.end));
        let end = offset_of(&self.lines, to.row, to.column).min(len);
        let start = offset_of(&self.lines, from.row, from.column).min(end);
        let removed: String = self.lines.join("\n").chars().skip(start).take(end - start).collect();
        self.splice(start, end, "");
        vec![Delta::remove_text(Range::new(from, to), removed)]
    }

    fn set_text(&mut self, text: &str) -> Vec<Delta> {
        let previous = self.lines.join("\n");
        let end = position_of(&self.lines, total_len(&self.lines)).unwrap_or(Position::new(0, 0));
        self.lines = split_lines(text).into_iter().map(str::to_owned).collect();
        let new_end = position_of(&self.lines, total_len(&self.lines)).unwrap_or(Position::new(0, 0));

        let origin = Position::new(0, 0);
        let mut events = Vec::new();
        if !previous.is_empty() {
            events.push(Delta::remove_text(Range::new(origin, end), previous));
        }
        if !text.is_empty() {
            events.push(Delta::insert_text(Range::new(origin, new_end), text));
        }
        events
    }

    fn clear_change_listener(&mut self) {
        self.listening = false;
    }
}
