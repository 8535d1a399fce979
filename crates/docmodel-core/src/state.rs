//! Per-instance serialization state.
//!
//! Each instance remembers the union of every document it was updated from,
//! so a changes-only export can be computed by comparing against it, the ids
//! of related objects that have been named but not fetched yet, and the ids
//! materialized children had when they were assigned.

use std::collections::HashMap;
use std::time::Instant;

use crate::document::Document;
use crate::value::Value;

/// The last-known document of an instance.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    document: Document,
    /// When the snapshot last changed
    updated_at: Instant,
}

impl DocumentSnapshot {
    fn new() -> Self {
        Self {
            document: Document::new(),
            updated_at: Instant::now(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn updated_at(&self) -> Instant {
        self.updated_at
    }
}

/// Serialization state owned by one instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceState {
    snapshot: Option<DocumentSnapshot>,
    /// Relationship field name to pending id (or `Value::Null` for an explicit null)
    pending_related_ids: HashMap<String, Value>,
    /// Relationship field name to the id its child had when it was stored
    child_ids: HashMap<String, Value>,
}

impl InstanceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The union of every document imported so far, if any.
    pub fn last_known_document(&self) -> Option<&Document> {
        self.snapshot.as_ref().map(DocumentSnapshot::document)
    }

    pub fn snapshot(&self) -> Option<&DocumentSnapshot> {
        self.snapshot.as_ref()
    }

    /// Merge an incoming document into the snapshot. New top-level keys
    /// override old ones; keys not in `incoming` persist.
    #[tracing::instrument(level = "trace", skip(self, incoming))]
    pub fn merge_document(&mut self, incoming: &Document) {
        let snapshot = self.snapshot.get_or_insert_with(DocumentSnapshot::new);
        for (key, value) in incoming {
            snapshot.document.insert(key.clone(), value.clone());
        }
        snapshot.updated_at = Instant::now();
        tracing::trace!(
            keys = snapshot.document.len(),
            "merged document into snapshot"
        );
    }

    /// Forget every imported document. The next changes-only export will
    /// include everything.
    pub fn forget_original_document(&mut self) {
        self.snapshot = None;
    }

    /// The previously imported value for a top-level key.
    ///
    /// `None` means there is no prior value at all, which is different from
    /// a prior JSON `null`.
    pub fn old_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.last_known_document()?.get(key)
    }

    pub fn pending_related_id(&self, name: &str) -> Option<&Value> {
        self.pending_related_ids.get(name)
    }

    pub fn set_pending_related_id(&mut self, name: &str, id: Value) {
        self.pending_related_ids.insert(name.to_string(), id);
    }

    pub fn clear_pending_related_id(&mut self, name: &str) -> Option<Value> {
        self.pending_related_ids.remove(name)
    }

    /// Every relationship field that still has an unfetched id.
    pub fn pending_related_ids(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.pending_related_ids
            .iter()
            .map(|(name, id)| (name.as_str(), id))
    }

    /// The id the child stored under `name` had when it was assigned.
    pub fn assigned_child_id(&self, name: &str) -> Option<&Value> {
        self.child_ids.get(name)
    }

    pub(crate) fn set_assigned_child_id(&mut self, name: &str, id: Option<Value>) {
        match id {
            Some(id) => {
                self.child_ids.insert(name.to_string(), id);
            }
            None => {
                self.child_ids.remove(name);
            }
        }
    }
}
