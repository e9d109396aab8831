// Presence registry: who is connected to which document, and how many times.

use std::collections::HashMap;

use coedit_common::protocol::frames::{PresenceEntry, PresenceMap, Registration};

/// Display metadata a user supplies when joining a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMeta {
    pub name: String,
    pub url: String,
    pub gravatar: String,
}

impl From<&Registration> for UserMeta {
    fn from(registration: &Registration) -> Self {
        Self {
            name: registration.user_name.clone(),
            url: registration.user_url.clone(),
            gravatar: registration.user_gravatar.clone(),
        }
    }
}

/// Per-document, per-user connection counts.
///
/// Key: doc_id -> user_id -> entry. An entry exists exactly while its count
/// is positive, and a document key exists exactly while it has entries.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    docs: HashMap<String, PresenceMap>,
}

impl PresenceRegistry {
    /// Records one more connection of `user_id` on `doc_id` and returns the
    /// document's presence map.
    pub fn join(&mut self, doc_id: &str, user_id: &str, meta: UserMeta) -> PresenceMap {
        let users = self.docs.entry(doc_id.to_owned()).or_default();
        users
            .entry(user_id.to_owned())
            .and_modify(|entry| entry.count = entry.count.saturating_add(1))
            .or_insert_with(|| PresenceEntry {
                name: meta.name,
                url: meta.url,
                count: 1,
                gravatar: meta.gravatar,
            });
        users.clone()
    }

    /// Drops one connection of `user_id` on `doc_id`. Unknown entries are
    /// ignored. Returns the remaining (possibly empty) presence map.
    pub fn leave(&mut self, doc_id: &str, user_id: &str) -> PresenceMap {
        let Some(users) = self.docs.get_mut(doc_id) else {
            return PresenceMap::new();
        };

        if let Some(entry) = users.get_mut(user_id) {
            entry.count = entry.count.saturating_sub(1);
            if entry.count == 0 {
                users.remove(user_id);
            }
        }

        if users.is_empty() {
            self.docs.remove(doc_id);
            return PresenceMap::new();
        }
        users.clone()
    }

    pub fn snapshot(&self, doc_id: &str) -> PresenceMap {
        self.docs.get(doc_id).cloned().unwrap_or_default()
    }

    pub fn count(&self, doc_id: &str, user_id: &str) -> Option<u32> {
        self.docs.get(doc_id)?.get(user_id).map(|entry| entry.count)
    }

    /// Documents with at least one connected user, sorted.
    pub fn documents(&self) -> Vec<String> {
        let mut docs = self.docs.keys().cloned().collect::<Vec<_>>();
        docs.sort();
        docs
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> UserMeta {
        UserMeta {
            name: name.to_owned(),
            url: format!("/users/{}", name.to_lowercase()),
            gravatar: format!("https://gravatar.example/{}", name.to_lowercase()),
        }
    }

    // ── join ────────────────────────────────────────────────────────

    #[test]
    fn first_join_creates_entry_with_count_one() {
        let mut registry = PresenceRegistry::default();
        let users = registry.join("doc1", "alice", meta("Alice"));

        assert_eq!(users.len(), 1);
        assert_eq!(users["alice"].count, 1);
        assert_eq!(users["alice"].name, "Alice");
        assert_eq!(users["alice"].url, "/users/alice");
    }

    #[test]
    fn second_tab_increments_count_and_keeps_first_meta() {
        let mut registry = PresenceRegistry::default();
        registry.join("doc1", "alice", meta("Alice"));
        let users = registry.join("doc1", "alice", meta("Alicia"));

        assert_eq!(users["alice"].count, 2);
        assert_eq!(users["alice"].name, "Alice");
    }

    #[test]
    fn documents_are_isolated() {
        let mut registry = PresenceRegistry::default();
        registry.join("doc1", "alice", meta("Alice"));
        let users = registry.join("doc2", "bob", meta("Bob"));

        assert_eq!(users.keys().collect::<Vec<_>>(), vec!["bob"]);
        assert_eq!(registry.documents(), vec!["doc1", "doc2"]);
    }

    // ── leave ───────────────────────────────────────────────────────

    #[test]
    fn leave_decrements_then_removes_entry() {
        let mut registry = PresenceRegistry::default();
        registry.join("doc1", "alice", meta("Alice"));
        registry.join("doc1", "alice", meta("Alice"));
        registry.join("doc1", "bob", meta("Bob"));

        let users = registry.leave("doc1", "alice");
        assert_eq!(users["alice"].count, 1);

        let users = registry.leave("doc1", "alice");
        assert!(!users.contains_key("alice"));
        assert_eq!(registry.count("doc1", "alice"), None);
        assert_eq!(registry.count("doc1", "bob"), Some(1));
    }

    #[test]
    fn last_leave_removes_document_key() {
        let mut registry = PresenceRegistry::default();
        registry.join("doc1", "alice", meta("Alice"));

        let users = registry.leave("doc1", "alice");
        assert!(users.is_empty());
        assert!(registry.is_empty());
        assert!(registry.documents().is_empty());
    }

    #[test]
    fn leave_without_join_is_a_noop() {
        let mut registry = PresenceRegistry::default();
        assert!(registry.leave("doc1", "ghost").is_empty());

        registry.join("doc1", "alice", meta("Alice"));
        let users = registry.leave("doc1", "ghost");
        assert_eq!(users["alice"].count, 1);
    }

    #[test]
    fn snapshot_of_unknown_doc_is_empty() {
        let registry = PresenceRegistry::default();
        assert!(registry.snapshot("nowhere").is_empty());
    }

    #[test]
    fn user_meta_from_registration() {
        let registration = Registration {
            doc_id: "doc1".into(),
            user_id: "alice".into(),
            user_name: "Alice".into(),
            user_url: "/u/alice".into(),
            user_gravatar: "g".into(),
        };
        assert_eq!(
            UserMeta::from(&registration),
            UserMeta { name: "Alice".into(), url: "/u/alice".into(), gravatar: "g".into() }
        );
    }
}
