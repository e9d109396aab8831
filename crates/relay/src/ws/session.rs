use std::collections::HashMap;

use coedit_common::protocol::frames::Registration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub(crate) const MAX_FRAME_BYTES: usize = 262_144;

/// Channel feeding already-encoded frames to one socket task.
pub type Outbound = mpsc::UnboundedSender<String>;

/// One live transport connection.
#[derive(Debug)]
pub struct Session {
    registration: Option<Registration>,
    outbound: Outbound,
}

impl Session {
    pub fn new(outbound: Outbound) -> Self {
        Self { registration: None, outbound }
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }

    pub fn doc_id(&self) -> Option<&str> {
        self.registration.as_ref().map(|registration| registration.doc_id.as_str())
    }

    /// Binds the session to a document. A session is registered at most
    /// once; later calls return false and leave the binding untouched.
    pub fn register(&mut self, registration: Registration) -> bool {
        if self.registration.is_some() {
            return false;
        }
        self.registration = Some(registration);
        true
    }

    /// Queues `payload` for the socket. Returns false once the socket task
    /// has gone away.
    pub fn send(&self, payload: &str) -> bool {
        self.outbound.send(payload.to_owned()).is_ok()
    }
}

/// All live sessions, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<Uuid, Session>,
}

impl SessionTable {
    pub fn insert(&mut self, session_id: Uuid, outbound: Outbound) {
        self.sessions.insert(session_id, Session::new(outbound));
    }

    pub fn remove(&mut self, session_id: Uuid) -> Option<Session> {
        self.sessions.remove(&session_id)
    }

    pub fn get(&self, session_id: Uuid) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn get_mut(&mut self, session_id: Uuid) -> Option<&mut Session> {
        self.sessions.get_mut(&session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Delivers `payload` to every session bound to `doc_id`. Closed
    /// sessions are skipped. Returns the number of deliveries.
    pub fn broadcast(&self, doc_id: &str, payload: &str) -> usize {
        self.sessions
            .values()
            .filter(|session| session.doc_id() == Some(doc_id))
            .filter(|session| session.send(payload))
            .count()
    }

    pub fn bound_to(&self, doc_id: &str) -> usize {
        self.sessions.values().filter(|session| session.doc_id() == Some(doc_id)).count()
    }
}
