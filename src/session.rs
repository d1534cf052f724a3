//! Sessions: the host-facing entry point tying an engine to its listener
//! registries.

use crate::blobs::{Blob, BlobStore, BlobWriteStream};
use crate::dispatch::{self, trampolines, DispatchStatsSnapshot, Dispatcher};
use crate::error::{BridgeError, Result};
use crate::native::{ContextPtr, Engine, ListenerTarget, NativeDocument, NativeListener, Trampoline};
use crate::types::{
    ConflictResolution, Document, ExecutionContext, ListenerKind, ListenerToken,
    ReplicatedDocument, ReplicatorStatus, Value, SESSION_KEY, TOKEN_KEY,
};
use crate::values::{to_value, ValueReader, ValueWriter, DEFAULT_MAX_DEPTH};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Session configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Deepest nesting accepted when reading or writing values.
    pub max_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

struct ListenerEntry {
    kind: ListenerKind,
    /// `None` while the registration is still in progress.
    native: Option<NativeListener>,
}

/// Where a new registration goes on the engine side.
enum Attach {
    Listener(ListenerTarget, Trampoline),
    Buffering,
}

/// A host session over one engine.
///
/// Owns the session's callback registries; listeners registered through it
/// are removed when it is closed or dropped.
pub struct Session {
    engine: Arc<dyn Engine>,
    dispatcher: Arc<Dispatcher>,
    config: SessionConfig,
    listeners: Mutex<HashMap<String, ListenerEntry>>,
    closed: AtomicBool,
}

impl Session {
    pub fn new(engine: Arc<dyn Engine>, config: SessionConfig) -> Self {
        let reader = ValueReader::new(config.max_depth).with_blob_store(Some(engine.blob_store()));
        let writer = ValueWriter::new(config.max_depth);
        let dispatcher = Arc::new(Dispatcher::new(dispatch::next_session_id(), reader, writer));
        dispatch::register(&dispatcher);
        tracing::debug!(session = dispatcher.id(), "session opened");

        Self {
            engine,
            dispatcher,
            config,
            listeners: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.dispatcher.id()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::SessionClosed);
        }
        Ok(())
    }

    // --- Registration ---

    /// Common registration path: reserve the token, record the callback,
    /// pack the context and hand the trampoline to the engine. Any failure
    /// undoes the earlier steps.
    fn register(
        &self,
        kind: ListenerKind,
        attach: Attach,
        mut context: ExecutionContext,
        keys: &[&str],
        install: impl FnOnce(&Dispatcher, &str) -> Result<()>,
    ) -> Result<ListenerToken> {
        self.ensure_open()?;

        let token = context
            .token()
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        {
            let mut listeners = self.listeners.lock();
            if listeners.contains_key(&token) {
                return Err(BridgeError::DuplicateToken(token));
            }
            listeners.insert(token.clone(), ListenerEntry { kind, native: None });
        }

        let attached = self.attach(kind, attach, &mut context, keys, &token, install);
        let native = match attached {
            Ok(native) => native,
            Err(error) => {
                self.listeners.lock().remove(&token);
                return Err(error);
            }
        };

        let native_id = native.id();
        let orphaned = {
            let mut listeners = self.listeners.lock();
            match listeners.get_mut(&token) {
                Some(entry) => {
                    entry.native = Some(native);
                    None
                }
                None => Some(native),
            }
        };
        if let Some(native) = orphaned {
            // Removed by id while the engine registration was in flight.
            self.engine.remove_listener(native);
            return Err(BridgeError::ListenerNotFound(token));
        }

        tracing::debug!(session = self.id(), token = %token, kind = %kind, "listener registered");
        Ok(ListenerToken {
            token,
            kind,
            native_id,
        })
    }

    fn attach(
        &self,
        kind: ListenerKind,
        attach: Attach,
        context: &mut ExecutionContext,
        keys: &[&str],
        token: &str,
        install: impl FnOnce(&Dispatcher, &str) -> Result<()>,
    ) -> Result<NativeListener> {
        context.insert(TOKEN_KEY, token);
        context.insert(SESSION_KEY, Value::UInt(self.id()));
        let mut packed_keys: Vec<&str> = vec![TOKEN_KEY, SESSION_KEY];
        packed_keys.extend(keys.iter().copied().filter(|k| !packed_keys_reserved(k)));

        let packed = dispatch::pack(context, &packed_keys, self.dispatcher.writer())?;
        install(&*self.dispatcher, token)?;
        let context = ContextPtr::new(packed);

        match attach {
            Attach::Listener(target, trampoline) => {
                self.engine
                    .add_listener(target, trampoline, context)
                    .map_err(|error| {
                        self.dispatcher.registries().remove(kind, token);
                        BridgeError::Engine(error)
                    })
            }
            Attach::Buffering => Ok(self
                .engine
                .buffer_notifications(trampolines::notification_ready_trampoline, context)),
        }
    }

    /// Be told about every database change. The callback receives the ids
    /// of the changed documents.
    pub fn add_database_change_listener<F>(
        &self,
        context: ExecutionContext,
        keys: &[&str],
        callback: F,
    ) -> Result<ListenerToken>
    where
        F: Fn(&ExecutionContext, &[String]) + Send + Sync + 'static,
    {
        self.register(
            ListenerKind::DatabaseChange,
            Attach::Listener(
                ListenerTarget::Database,
                Trampoline::DatabaseChange(trampolines::database_change_trampoline),
            ),
            context,
            keys,
            |d, token| d.registries().database_change.insert(token, Arc::new(callback)),
        )
    }

    pub fn add_document_change_listener<F>(
        &self,
        doc_id: &str,
        context: ExecutionContext,
        keys: &[&str],
        callback: F,
    ) -> Result<ListenerToken>
    where
        F: Fn(&ExecutionContext, &str) + Send + Sync + 'static,
    {
        self.register(
            ListenerKind::DocumentChange,
            Attach::Listener(
                ListenerTarget::Document(doc_id.to_string()),
                Trampoline::DocumentChange(trampolines::document_change_trampoline),
            ),
            context,
            keys,
            |d, token| d.registries().document_change.insert(token, Arc::new(callback)),
        )
    }

    /// Be told about new results of a live query. Rows are decoded nested.
    pub fn add_query_change_listener<F>(
        &self,
        query: &str,
        context: ExecutionContext,
        keys: &[&str],
        callback: F,
    ) -> Result<ListenerToken>
    where
        F: Fn(&ExecutionContext, &[Value]) + Send + Sync + 'static,
    {
        self.register(
            ListenerKind::QueryChange,
            Attach::Listener(
                ListenerTarget::Query(query.to_string()),
                Trampoline::QueryChange(trampolines::query_change_trampoline),
            ),
            context,
            keys,
            |d, token| d.registries().query_change.insert(token, Arc::new(callback)),
        )
    }

    pub fn add_replicator_change_listener<F>(
        &self,
        replicator: &str,
        context: ExecutionContext,
        keys: &[&str],
        callback: F,
    ) -> Result<ListenerToken>
    where
        F: Fn(&ExecutionContext, &ReplicatorStatus) + Send + Sync + 'static,
    {
        self.register(
            ListenerKind::ReplicatorChange,
            Attach::Listener(
                ListenerTarget::Replicator(replicator.to_string()),
                Trampoline::ReplicatorChange(trampolines::replicator_change_trampoline),
            ),
            context,
            keys,
            |d, token| d.registries().replicator_change.insert(token, Arc::new(callback)),
        )
    }

    pub fn add_replicated_document_listener<F>(
        &self,
        replicator: &str,
        context: ExecutionContext,
        keys: &[&str],
        callback: F,
    ) -> Result<ListenerToken>
    where
        F: Fn(&ExecutionContext, bool, &[ReplicatedDocument]) + Send + Sync + 'static,
    {
        self.register(
            ListenerKind::ReplicatedDocument,
            Attach::Listener(
                ListenerTarget::Replicator(replicator.to_string()),
                Trampoline::ReplicatedDocument(trampolines::replicated_document_trampoline),
            ),
            context,
            keys,
            |d, token| {
                d.registries()
                    .replicated_document
                    .insert(token, Arc::new(callback))
            },
        )
    }

    /// Decide which documents a replicator pushes.
    pub fn set_push_filter<F>(
        &self,
        replicator: &str,
        context: ExecutionContext,
        keys: &[&str],
        filter: F,
    ) -> Result<ListenerToken>
    where
        F: Fn(&ExecutionContext, &Document, bool) -> bool + Send + Sync + 'static,
    {
        self.register(
            ListenerKind::PushFilter,
            Attach::Listener(
                ListenerTarget::Replicator(replicator.to_string()),
                Trampoline::PushFilter(trampolines::push_filter_trampoline),
            ),
            context,
            keys,
            |d, token| d.registries().push_filter.insert(token, Arc::new(filter)),
        )
    }

    /// Decide which documents a replicator pulls.
    pub fn set_pull_filter<F>(
        &self,
        replicator: &str,
        context: ExecutionContext,
        keys: &[&str],
        filter: F,
    ) -> Result<ListenerToken>
    where
        F: Fn(&ExecutionContext, &Document, bool) -> bool + Send + Sync + 'static,
    {
        self.register(
            ListenerKind::PullFilter,
            Attach::Listener(
                ListenerTarget::Replicator(replicator.to_string()),
                Trampoline::PullFilter(trampolines::pull_filter_trampoline),
            ),
            context,
            keys,
            |d, token| d.registries().pull_filter.insert(token, Arc::new(filter)),
        )
    }

    /// Settle replication conflicts. The resolver may be called many times
    /// until removed.
    pub fn set_conflict_resolver<F>(
        &self,
        replicator: &str,
        context: ExecutionContext,
        keys: &[&str],
        resolver: F,
    ) -> Result<ListenerToken>
    where
        F: Fn(&ExecutionContext, &str, Option<&Document>, Option<&Document>) -> ConflictResolution
            + Send
            + Sync
            + 'static,
    {
        self.register(
            ListenerKind::ConflictResolver,
            Attach::Listener(
                ListenerTarget::Replicator(replicator.to_string()),
                Trampoline::ConflictResolver(trampolines::conflict_resolver_trampoline),
            ),
            context,
            keys,
            |d, token| d.registries().conflict_resolver.insert(token, Arc::new(resolver)),
        )
    }

    /// Switch the engine to buffered notifications. `ready` is called, on
    /// an engine thread, when notifications become pending; deliver them
    /// with [`Session::send_notifications`] on a thread of your choosing.
    ///
    /// A previous buffering registration of this session is replaced.
    pub fn buffer_notifications<F>(
        &self,
        context: ExecutionContext,
        keys: &[&str],
        ready: F,
    ) -> Result<ListenerToken>
    where
        F: Fn(&ExecutionContext) + Send + Sync + 'static,
    {
        let listener = self.register(
            ListenerKind::NotificationReady,
            Attach::Buffering,
            context,
            keys,
            |d, token| {
                if let Some(previous) = d.registries().notification_ready.set(token, Arc::new(ready)) {
                    tracing::debug!(token = %previous, "buffering listener replaced");
                }
                Ok(())
            },
        )?;

        self.listeners.lock().retain(|token, entry| {
            entry.kind != ListenerKind::NotificationReady || *token == listener.token
        });
        Ok(listener)
    }

    /// Deliver pending buffered notifications on the calling thread.
    pub fn send_notifications(&self) {
        self.engine.send_notifications();
    }

    /// Remove a listener. The token is consumed.
    pub fn remove_listener(&self, listener: ListenerToken) -> Result<()> {
        self.remove_listener_by_id(&listener.token)
    }

    /// Remove a listener by its token string.
    pub fn remove_listener_by_id(&self, token: &str) -> Result<()> {
        let entry = self
            .listeners
            .lock()
            .remove(token)
            .ok_or_else(|| BridgeError::ListenerNotFound(token.to_string()))?;

        self.dispatcher.registries().remove(entry.kind, token);
        if let Some(native) = entry.native {
            self.engine.remove_listener(native);
        }
        tracing::debug!(session = self.id(), token, kind = %entry.kind, "listener removed");
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn dispatch_stats(&self) -> DispatchStatsSnapshot {
        self.dispatcher.stats().snapshot()
    }

    // --- Documents ---

    fn native_document(&self, id: &str) -> Result<Option<Arc<NativeDocument>>> {
        self.ensure_open()?;
        Ok(self.engine.document(id))
    }

    /// Read a document with nested properties.
    pub fn document(&self, id: &str) -> Result<Option<Document>> {
        self.native_document(id)?
            .map(|doc| self.dispatcher.read_document(&doc))
            .transpose()
    }

    pub fn properties(&self, id: &str) -> Result<Option<BTreeMap<String, Value>>> {
        Ok(self.document(id)?.map(|doc| doc.properties))
    }

    /// Read a document's properties flattened into path keys.
    pub fn flattened_properties(&self, id: &str) -> Result<Option<BTreeMap<String, Value>>> {
        self.native_document(id)?
            .map(|doc| self.dispatcher.reader().read_flattened(doc.properties()))
            .transpose()
    }

    /// Replace a document's properties. Nothing is written unless every
    /// property can be encoded.
    pub fn save_properties(&self, id: &str, properties: &BTreeMap<String, Value>) -> Result<Document> {
        self.ensure_open()?;
        let dict = self.dispatcher.writer().write_dict(properties)?.into_dict();
        let saved = self.engine.save_document(id, dict)?;
        self.dispatcher.read_document(&saved)
    }

    /// Save any serializable host value whose shape is a map or struct.
    pub fn save<T: Serialize + ?Sized>(&self, id: &str, properties: &T) -> Result<Document> {
        match to_value(properties)? {
            Value::Dict(entries) => self.save_properties(id, &entries),
            other => Err(BridgeError::UnsupportedValueShape(format!(
                "document properties must be a map, got {}",
                other.type_name()
            ))),
        }
    }

    /// Replace a document's properties from a JSON object.
    pub fn save_json(&self, id: &str, json: &str) -> Result<Document> {
        match Value::from_json_str(json)? {
            Value::Dict(entries) => self.save_properties(id, &entries),
            other => Err(BridgeError::UnsupportedValueShape(format!(
                "document JSON must be an object, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn properties_json(&self, id: &str) -> Result<Option<String>> {
        self.properties(id)?
            .map(|properties| Value::Dict(properties).to_json_string())
            .transpose()
    }

    // --- Blobs ---

    pub fn blob_store(&self) -> Arc<BlobStore> {
        self.engine.blob_store()
    }

    pub fn create_blob(&self, content_type: Option<&str>, bytes: &[u8]) -> Result<Blob> {
        self.ensure_open()?;
        Blob::create_from_bytes(&self.engine.blob_store(), content_type, bytes)
    }

    /// Open a stream for a new blob; finish it with
    /// [`Blob::create_from_stream`].
    pub fn new_blob_writer(&self) -> Result<BlobWriteStream> {
        self.ensure_open()?;
        Ok(BlobWriteStream::new(self.engine.blob_store()))
    }

    // --- Lifecycle ---

    /// Remove every listener and detach from dispatch. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let tokens: Vec<String> = self.listeners.lock().keys().cloned().collect();
        for token in tokens {
            if let Err(error) = self.remove_listener_by_id(&token) {
                tracing::debug!(
                    session = self.id(),
                    token = %token,
                    %error,
                    "listener already gone at close"
                );
            }
        }
        dispatch::unregister(self.id());
        tracing::debug!(session = self.id(), "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn packed_keys_reserved(key: &str) -> bool {
    key == TOKEN_KEY || key == SESSION_KEY
}
