// Document id rules shared by socket registration and the admin routes.

use thiserror::Error;

/// Longest accepted document id, in chars.
pub const MAX_DOC_ID_CHARS: usize = 256;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DocIdError {
    #[error("doc id must not be empty")]
    Empty,
    #[error("doc id exceeds {MAX_DOC_ID_CHARS} characters")]
    TooLong,
    #[error("doc id must not contain control characters")]
    ControlCharacter,
}

/// Checks that `doc_id` is non-blank, at most [`MAX_DOC_ID_CHARS`] long and
/// free of control characters.
pub fn validate_doc_id(doc_id: &str) -> Result<(), DocIdError> {
    if doc_id.trim().is_empty() {
        return Err(DocIdError::Empty);
    }
    if doc_id.chars().count() > MAX_DOC_ID_CHARS {
        return Err(DocIdError::TooLong);
    }
    if doc_id.chars().any(char::is_control) {
        return Err(DocIdError::ControlCharacter);
    }
    Ok(())
}
