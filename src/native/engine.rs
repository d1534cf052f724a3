//! The engine collaborator as seen by the bridge.

use super::ffi::{
    ConflictResolverFn, ContextPtr, DatabaseChangeFn, DocumentChangeFn, NativeDocument,
    NativeError, NativeListener, NotificationReadyFn, QueryChangeFn, ReplicatedDocumentFn,
    ReplicationFilterFn, ReplicatorChangeFn,
};
use super::value::NativeDict;
use crate::blobs::BlobStore;
use crate::types::ListenerKind;
use std::sync::Arc;

/// What a listener observes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ListenerTarget {
    Database,
    Document(String),
    Query(String),
    Replicator(String),
}

/// The callback entry point handed to the engine for one registration.
#[derive(Clone, Copy, Debug)]
pub enum Trampoline {
    DatabaseChange(DatabaseChangeFn),
    DocumentChange(DocumentChangeFn),
    QueryChange(QueryChangeFn),
    PushFilter(ReplicationFilterFn),
    PullFilter(ReplicationFilterFn),
    ReplicatorChange(ReplicatorChangeFn),
    ReplicatedDocument(ReplicatedDocumentFn),
    ConflictResolver(ConflictResolverFn),
}

impl Trampoline {
    pub fn kind(&self) -> ListenerKind {
        match self {
            Trampoline::DatabaseChange(_) => ListenerKind::DatabaseChange,
            Trampoline::DocumentChange(_) => ListenerKind::DocumentChange,
            Trampoline::QueryChange(_) => ListenerKind::QueryChange,
            Trampoline::PushFilter(_) => ListenerKind::PushFilter,
            Trampoline::PullFilter(_) => ListenerKind::PullFilter,
            Trampoline::ReplicatorChange(_) => ListenerKind::ReplicatorChange,
            Trampoline::ReplicatedDocument(_) => ListenerKind::ReplicatedDocument,
            Trampoline::ConflictResolver(_) => ListenerKind::ConflictResolver,
        }
    }
}

/// Operations the bridge needs from the embedded engine.
///
/// Implementations may invoke trampolines from any thread, including
/// concurrently with calls into this trait.
pub trait Engine: Send + Sync {
    /// Register a trampoline. The engine keeps `context` until the listener
    /// is removed and passes `context.as_raw()` to every invocation.
    fn add_listener(
        &self,
        target: ListenerTarget,
        trampoline: Trampoline,
        context: ContextPtr,
    ) -> Result<NativeListener, NativeError>;

    /// Release a registration and its context. Returns false if unknown.
    fn remove_listener(&self, listener: NativeListener) -> bool;

    /// Switch to buffered notifications: listener calls are queued and
    /// `callback` is invoked once when the first one becomes pending.
    fn buffer_notifications(
        &self,
        callback: NotificationReadyFn,
        context: ContextPtr,
    ) -> NativeListener;

    /// Deliver all queued notifications on the calling thread.
    fn send_notifications(&self);

    fn document(&self, id: &str) -> Option<Arc<NativeDocument>>;

    fn save_document(
        &self,
        id: &str,
        properties: NativeDict,
    ) -> Result<Arc<NativeDocument>, NativeError>;

    fn blob_store(&self) -> Arc<BlobStore>;
}
