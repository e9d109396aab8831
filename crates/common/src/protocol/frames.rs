// JSON frames exchanged over a collaboration socket.
//
// Inbound traffic is either a registration frame or an opaque OT frame that
// the server relays verbatim. Outbound control frames are tagged by `type`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::doc_id::validate_doc_id;

/// Presence map for one document, keyed by user id.
pub type PresenceMap = BTreeMap<String, PresenceEntry>;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid registration frame: {0}")]
    InvalidRegistration(String),
}

/// Identity a client announces when it binds its connection to a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub doc_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_url: String,
    #[serde(default)]
    pub user_gravatar: String,
}

#[derive(Serialize, Deserialize)]
struct RegistrationEnvelope {
    registration: bool,
    #[serde(flatten)]
    fields: Registration,
}

impl Registration {
    /// Encodes the registration as the `{registration: true, ...}` frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&RegistrationEnvelope { registration: true, fields: self.clone() })
    }

    fn validate(self) -> Result<Self, FrameError> {
        validate_doc_id(&self.doc_id)
            .map_err(|error| FrameError::InvalidRegistration(error.to_string()))?;
        if self.user_id.trim().is_empty() {
            return Err(FrameError::InvalidRegistration("userId must not be empty".into()));
        }
        Ok(self)
    }
}

/// One user's presence on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub name: String,
    pub url: String,
    pub count: u32,
    pub gravatar: String,
}

/// Client -> server frame after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Registration(Registration),
    /// OT protocol traffic; the raw text is relayed untouched.
    Edit,
}

/// Classifies a raw inbound text frame.
///
/// Anything that parses as JSON and is not flagged `registration: true` is
/// treated as OT traffic.
pub fn decode_inbound(raw: &str) -> Result<InboundFrame, FrameError> {
    let value: Value = serde_json::from_str(raw)?;
    if value.get("registration") != Some(&Value::Bool(true)) {
        return Ok(InboundFrame::Edit);
    }

    let envelope = serde_json::from_value::<RegistrationEnvelope>(value)
        .map_err(|error| FrameError::InvalidRegistration(error.to_string()))?;
    envelope.fields.validate().map(InboundFrame::Registration)
}

/// Server -> client control frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Full presence map of the document.
    Meta { users: PresenceMap },
    Lock,
    Unlock,
    Redirect { redirect: String },
    /// Same transport shape as `Redirect`; the document no longer exists.
    Delete { redirect: String },
}

impl ServerFrame {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Meta { .. } => "meta",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Redirect { .. } => "redirect",
            Self::Delete { .. } => "delete",
        }
    }
}
