//! Per-kind callback registries.

use crate::error::{BridgeError, Result};
use crate::types::{
    ConflictResolution, Document, ExecutionContext, ListenerKind, ReplicatedDocument,
    ReplicatorStatus, Value,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub type DatabaseChangeCallback = Arc<dyn Fn(&ExecutionContext, &[String]) + Send + Sync>;
pub type DocumentChangeCallback = Arc<dyn Fn(&ExecutionContext, &str) + Send + Sync>;
pub type QueryChangeCallback = Arc<dyn Fn(&ExecutionContext, &[Value]) + Send + Sync>;
pub type NotificationReadyCallback = Arc<dyn Fn(&ExecutionContext) + Send + Sync>;
/// Receives the document and whether it is a deletion; returns whether to
/// replicate it.
pub type ReplicationFilterCallback =
    Arc<dyn Fn(&ExecutionContext, &Document, bool) -> bool + Send + Sync>;
pub type ReplicatorChangeCallback = Arc<dyn Fn(&ExecutionContext, &ReplicatorStatus) + Send + Sync>;
/// Receives the push direction flag and the replicated documents.
pub type ReplicatedDocumentCallback =
    Arc<dyn Fn(&ExecutionContext, bool, &[ReplicatedDocument]) + Send + Sync>;
/// Receives the document id and the local and remote revisions (absent when
/// deleted on that side).
pub type ConflictResolverCallback = Arc<
    dyn Fn(&ExecutionContext, &str, Option<&Document>, Option<&Document>) -> ConflictResolution
        + Send
        + Sync,
>;

/// Token-to-callback table for one listener kind.
pub struct Registry<C> {
    kind: ListenerKind,
    entries: Mutex<HashMap<String, C>>,
}

impl<C: Clone> Registry<C> {
    pub fn new(kind: ListenerKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    pub fn insert(&self, token: &str, callback: C) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(token) {
            return Err(BridgeError::DuplicateToken(token.to_string()));
        }
        entries.insert(token.to_string(), callback);
        Ok(())
    }

    /// Clone of the callback for `token`. The lock is released on return,
    /// so the callback may be invoked without holding it.
    pub fn get(&self, token: &str) -> Option<C> {
        self.entries.lock().get(token).cloned()
    }

    pub fn remove(&self, token: &str) -> Option<C> {
        self.entries.lock().remove(token)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.entries.lock().contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// The single notification-ready slot.
pub struct NotificationSlot {
    slot: Mutex<Option<(String, NotificationReadyCallback)>>,
}

impl NotificationSlot {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Install a callback, returning the token it replaced.
    pub fn set(&self, token: &str, callback: NotificationReadyCallback) -> Option<String> {
        self.slot
            .lock()
            .replace((token.to_string(), callback))
            .map(|(previous, _)| previous)
    }

    pub fn get(&self, token: &str) -> Option<NotificationReadyCallback> {
        match self.slot.lock().as_ref() {
            Some((current, callback)) if current == token => Some(Arc::clone(callback)),
            _ => None,
        }
    }

    pub fn clear(&self, token: &str) -> bool {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some((current, _)) if current == token => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn token(&self) -> Option<String> {
        self.slot.lock().as_ref().map(|(token, _)| token.clone())
    }
}

/// All registries of one session.
pub struct Registries {
    pub database_change: Registry<DatabaseChangeCallback>,
    pub document_change: Registry<DocumentChangeCallback>,
    pub query_change: Registry<QueryChangeCallback>,
    pub notification_ready: NotificationSlot,
    pub push_filter: Registry<ReplicationFilterCallback>,
    pub pull_filter: Registry<ReplicationFilterCallback>,
    pub replicator_change: Registry<ReplicatorChangeCallback>,
    pub replicated_document: Registry<ReplicatedDocumentCallback>,
    pub conflict_resolver: Registry<ConflictResolverCallback>,
}

impl Registries {
    pub fn new() -> Self {
        Self {
            database_change: Registry::new(ListenerKind::DatabaseChange),
            document_change: Registry::new(ListenerKind::DocumentChange),
            query_change: Registry::new(ListenerKind::QueryChange),
            notification_ready: NotificationSlot::new(),
            push_filter: Registry::new(ListenerKind::PushFilter),
            pull_filter: Registry::new(ListenerKind::PullFilter),
            replicator_change: Registry::new(ListenerKind::ReplicatorChange),
            replicated_document: Registry::new(ListenerKind::ReplicatedDocument),
            conflict_resolver: Registry::new(ListenerKind::ConflictResolver),
        }
    }

    /// Drop the callback registered under `token` for `kind`.
    pub fn remove(&self, kind: ListenerKind, token: &str) -> bool {
        match kind {
            ListenerKind::DatabaseChange => self.database_change.remove(token).is_some(),
            ListenerKind::DocumentChange => self.document_change.remove(token).is_some(),
            ListenerKind::QueryChange => self.query_change.remove(token).is_some(),
            ListenerKind::NotificationReady => self.notification_ready.clear(token),
            ListenerKind::PushFilter => self.push_filter.remove(token).is_some(),
            ListenerKind::PullFilter => self.pull_filter.remove(token).is_some(),
            ListenerKind::ReplicatorChange => self.replicator_change.remove(token).is_some(),
            ListenerKind::ReplicatedDocument => self.replicated_document.remove(token).is_some(),
            ListenerKind::ConflictResolver => self.conflict_resolver.remove(token).is_some(),
        }
    }

    /// Number of registered callbacks across all kinds.
    pub fn len(&self) -> usize {
        self.database_change.len()
            + self.document_change.len()
            + self.query_change.len()
            + self.notification_ready.token().is_some() as usize
            + self.push_filter.len()
            + self.pull_filter.len()
            + self.replicator_change.len()
            + self.replicated_document.len()
            + self.conflict_resolver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}
