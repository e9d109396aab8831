// Administrative edit locks per document.

use std::collections::HashSet;

/// Set of locked documents; absence means unlocked.
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    locked: HashSet<String>,
}

impl LockTable {
    /// Locks `doc_id`. Returns false when it was already locked.
    pub fn lock(&mut self, doc_id: &str) -> bool {
        self.locked.insert(doc_id.to_owned())
    }

    /// Unlocks `doc_id`. Returns false when it was not locked.
    pub fn unlock(&mut self, doc_id: &str) -> bool {
        self.locked.remove(doc_id)
    }

    pub fn is_locked(&self, doc_id: &str) -> bool {
        self.locked.contains(doc_id)
    }

    pub fn locked_documents(&self) -> Vec<String> {
        let mut docs = self.locked.iter().cloned().collect::<Vec<_>>();
        docs.sort();
        docs
    }
}
