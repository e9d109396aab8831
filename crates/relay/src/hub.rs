// Collaboration hub: the one owner of presence, locks and live sessions.
//
// Every mutation and the broadcast it triggers happen under the same write
// guard, so recipients observe presence snapshots in mutation order.

use std::sync::Arc;

use coedit_common::protocol::frames::{PresenceMap, Registration, ServerFrame};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::lock::LockTable;
use crate::presence::{PresenceRegistry, UserMeta};
use crate::ws::session::{Outbound, SessionTable};

#[derive(Debug, Default)]
struct HubState {
    sessions: SessionTable,
    presence: PresenceRegistry,
    locks: LockTable,
}

#[derive(Debug, Clone, Default)]
pub struct CollabHub {
    state: Arc<RwLock<HubState>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Joined { recipients: usize, locked: bool },
    AlreadyRegistered,
    UnknownSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditRoute {
    Forward,
    /// Document is locked; the frame must be dropped.
    Locked,
}

/// Operator view of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocStatus {
    pub doc_id: String,
    pub locked: bool,
    pub sessions: usize,
    pub users: PresenceMap,
}

/// Operator view of the whole relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocOverview {
    /// Documents with at least one registered user.
    pub active: Vec<String>,
    pub locked: Vec<String>,
    pub sessions: usize,
}

fn encode(frame: &ServerFrame) -> Option<String> {
    match frame.encode() {
        Ok(payload) => Some(payload),
        Err(error) => {
            error!(?error, kind = frame.kind(), "failed to encode server frame");
            None
        }
    }
}

fn broadcast_frame(sessions: &SessionTable, doc_id: &str, frame: &ServerFrame) -> usize {
    let Some(payload) = encode(frame) else {
        return 0;
    };
    let recipients = sessions.broadcast(doc_id, &payload);
    debug!(doc_id = %doc_id, kind = frame.kind(), recipients, "broadcast");
    recipients
}

impl CollabHub {
    /// Adds a freshly connected, unregistered session.
    pub async fn connect(&self, session_id: Uuid, outbound: Outbound) {
        self.state.write().await.sessions.insert(session_id, outbound);
    }

    /// Binds a session to a document: presence join, presence broadcast,
    /// and a direct lock notice when the document is locked.
    pub async fn register(&self, session_id: Uuid, registration: Registration) -> RegisterOutcome {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let Some(session) = state.sessions.get_mut(session_id) else {
            return RegisterOutcome::UnknownSession;
        };
        if !session.register(registration.clone()) {
            warn!(session_id = %session_id, "ignoring repeated registration frame");
            return RegisterOutcome::AlreadyRegistered;
        }

        let doc_id = registration.doc_id.as_str();
        let users =
            state.presence.join(doc_id, &registration.user_id, UserMeta::from(&registration));
        let recipients = broadcast_frame(&state.sessions, doc_id, &ServerFrame::Meta { users });

        let locked = state.locks.is_locked(doc_id);
        if locked {
            if let (Some(session), Some(payload)) =
                (state.sessions.get(session_id), encode(&ServerFrame::Lock))
            {
                session.send(&payload);
            }
        }

        info!(
            session_id = %session_id,
            doc_id = %doc_id,
            user_id = %registration.user_id,
            locked,
            "session registered"
        );
        RegisterOutcome::Joined { recipients, locked }
    }

    /// Decides whether an edit frame from `session_id` reaches the OT
    /// engine. A locked document re-broadcasts the lock notice instead.
    pub async fn route_edit(&self, session_id: Uuid) -> EditRoute {
        let guard = self.state.read().await;
        let Some(doc_id) = guard.sessions.get(session_id).and_then(|session| session.doc_id())
        else {
            return EditRoute::Forward;
        };

        if !guard.locks.is_locked(doc_id) {
            return EditRoute::Forward;
        }

        debug!(session_id = %session_id, doc_id = %doc_id, "dropping edit on locked document");
        broadcast_frame(&guard.sessions, doc_id, &ServerFrame::Lock);
        EditRoute::Locked
    }

    /// Removes a closed session; registered sessions leave presence and the
    /// document receives the updated map.
    pub async fn disconnect(&self, session_id: Uuid) -> Option<Registration> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let registration = state.sessions.remove(session_id)?.registration().cloned()?;
        let users = state.presence.leave(&registration.doc_id, &registration.user_id);
        broadcast_frame(&state.sessions, &registration.doc_id, &ServerFrame::Meta { users });

        info!(
            session_id = %session_id,
            doc_id = %registration.doc_id,
            user_id = %registration.user_id,
            "session closed"
        );
        Some(registration)
    }

    pub async fn lock(&self, doc_id: &str) -> String {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let changed = state.locks.lock(doc_id);
        let recipients = broadcast_frame(&state.sessions, doc_id, &ServerFrame::Lock);
        info!(doc_id = %doc_id, changed, recipients, "document locked");
        format!("{doc_id} was locked.")
    }

    pub async fn unlock(&self, doc_id: &str) -> String {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let changed = state.locks.unlock(doc_id);
        let recipients = broadcast_frame(&state.sessions, doc_id, &ServerFrame::Unlock);
        info!(doc_id = %doc_id, changed, recipients, "document unlocked");
        format!("{doc_id} was unlocked.")
    }

    /// Sends every editor of `doc_id` to `target`. Lock state is kept.
    pub async fn redirect(&self, doc_id: &str, target: &str) -> String {
        let frame = ServerFrame::Redirect { redirect: target.to_owned() };
        let recipients = self.broadcast(doc_id, &frame).await;
        info!(doc_id = %doc_id, target = %target, recipients, "document redirected");
        format!("{doc_id} was redirected to {target}")
    }

    pub async fn notify_deleted(&self, doc_id: &str, target: &str) -> String {
        let frame = ServerFrame::Delete { redirect: target.to_owned() };
        let recipients = self.broadcast(doc_id, &frame).await;
        info!(doc_id = %doc_id, target = %target, recipients, "document deleted");
        format!("{doc_id} was deleted and redirected to {target}")
    }

    /// Delivers `frame` to every live session bound to `doc_id`.
    pub async fn broadcast(&self, doc_id: &str, frame: &ServerFrame) -> usize {
        broadcast_frame(&self.state.read().await.sessions, doc_id, frame)
    }

    pub async fn presence(&self, doc_id: &str) -> PresenceMap {
        self.state.read().await.presence.snapshot(doc_id)
    }

    pub async fn is_locked(&self, doc_id: &str) -> bool {
        self.state.read().await.locks.is_locked(doc_id)
    }

    pub async fn status(&self, doc_id: &str) -> DocStatus {
        let guard = self.state.read().await;
        DocStatus {
            doc_id: doc_id.to_owned(),
            locked: guard.locks.is_locked(doc_id),
            sessions: guard.sessions.bound_to(doc_id),
            users: guard.presence.snapshot(doc_id),
        }
    }

    pub async fn overview(&self) -> DocOverview {
        let guard = self.state.read().await;
        DocOverview {
            active: guard.presence.documents(),
            locked: guard.locks.locked_documents(),
            sessions: guard.sessions.len(),
        }
    }
}
