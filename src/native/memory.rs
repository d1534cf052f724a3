//! In-process engine: document storage, listener bookkeeping and callback
//! delivery through the same C-ABI trampolines a linked engine would call.

use super::engine::{Engine, ListenerTarget, Trampoline};
use super::ffi::{
    codes, ContextPtr, ErrorDomain, NativeDocument, NativeError, NativeListener,
    NativeReplicatedDocument, NativeReplicatorStatus, NotificationReadyFn,
};
use super::value::{NativeArray, NativeDict};
use crate::blobs::{BlobStore, DEFAULT_MAX_BLOB_SIZE};
use crate::types::ReplicatedDocument;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_char, c_uint, CString};
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Configuration for a [`MemoryEngine`].
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Largest blob the engine's store accepts.
    pub max_blob_size: usize,
    /// Name of the notification worker thread.
    pub worker_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
            worker_name: "docbridge-notify".to_string(),
        }
    }
}

struct Registration {
    target: ListenerTarget,
    trampoline: Trampoline,
    context: ContextPtr,
}

/// An asynchronous notification waiting for delivery.
enum Event {
    DatabaseChange {
        doc_ids: Vec<String>,
    },
    DocumentChange {
        doc_id: String,
    },
    QueryChange {
        query: String,
        rows: NativeArray,
    },
    ReplicatorChange {
        replicator: String,
        status: NativeReplicatorStatus,
    },
    ReplicatedDocuments {
        replicator: String,
        is_push: bool,
        docs: Vec<ReplicatedDocument>,
    },
}

impl Event {
    fn matches(&self, registration: &Registration) -> bool {
        match (self, &registration.trampoline, &registration.target) {
            (Event::DatabaseChange { .. }, Trampoline::DatabaseChange(_), ListenerTarget::Database) => {
                true
            }
            (
                Event::DocumentChange { doc_id },
                Trampoline::DocumentChange(_),
                ListenerTarget::Document(id),
            ) => doc_id == id,
            (Event::QueryChange { query, .. }, Trampoline::QueryChange(_), ListenerTarget::Query(q)) => {
                query == q
            }
            (
                Event::ReplicatorChange { replicator, .. },
                Trampoline::ReplicatorChange(_),
                ListenerTarget::Replicator(r),
            )
            | (
                Event::ReplicatedDocuments { replicator, .. },
                Trampoline::ReplicatedDocument(_),
                ListenerTarget::Replicator(r),
            ) => replicator == r,
            _ => false,
        }
    }
}

/// One listener invocation, holding its own context reference.
struct Delivery {
    trampoline: Trampoline,
    context: ContextPtr,
    event: Arc<Event>,
}

impl Delivery {
    fn deliver(&self) {
        invoke(self.trampoline, &self.context, &self.event);
    }
}

struct Buffering {
    listener: u64,
    callback: NotificationReadyFn,
    context: ContextPtr,
    pending: Vec<Delivery>,
    signalled: bool,
}

enum Command {
    Event(Event),
    Flush(Sender<()>),
    Shutdown,
}

struct Shared {
    listeners: RwLock<BTreeMap<u64, Registration>>,
    next_listener: AtomicU64,
    documents: RwLock<HashMap<String, Arc<NativeDocument>>>,
    sequence: AtomicU64,
    buffering: Mutex<Option<Buffering>>,
    blobs: Arc<BlobStore>,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_listener.fetch_add(1, Ordering::SeqCst)
    }

    fn matching(&self, event: &Arc<Event>) -> Vec<Delivery> {
        self.listeners
            .read()
            .values()
            .filter(|registration| event.matches(registration))
            .map(|registration| Delivery {
                trampoline: registration.trampoline,
                context: registration.context.clone(),
                event: Arc::clone(event),
            })
            .collect()
    }

    /// Deliver now, or queue when notifications are buffered.
    fn dispatch(&self, event: Event) {
        let mut deliveries = Some(self.matching(&Arc::new(event)));
        let ready = {
            let mut buffering = self.buffering.lock();
            match buffering.as_mut() {
                Some(buffer) => {
                    buffer.pending.extend(deliveries.take().into_iter().flatten());
                    if buffer.signalled || buffer.pending.is_empty() {
                        None
                    } else {
                        buffer.signalled = true;
                        Some((buffer.callback, buffer.context.clone()))
                    }
                }
                None => None,
            }
        };

        if let Some(deliveries) = deliveries {
            deliveries.iter().for_each(Delivery::deliver);
        }
        if let Some((callback, context)) = ready {
            callback(context.as_raw());
        }
    }

    /// The most recent registration of a synchronous callback for a replicator.
    fn latest_for(
        &self,
        replicator: &str,
        select: impl Fn(&Trampoline) -> bool,
    ) -> Option<(Trampoline, ContextPtr)> {
        self.listeners
            .read()
            .values()
            .rev()
            .find(|registration| {
                select(&registration.trampoline)
                    && registration.target == ListenerTarget::Replicator(replicator.to_string())
            })
            .map(|registration| (registration.trampoline, registration.context.clone()))
    }
}

fn c_string(value: &str) -> Option<CString> {
    match CString::new(value) {
        Ok(s) => Some(s),
        Err(_) => {
            tracing::warn!(value, "identifier contains NUL; not delivered");
            None
        }
    }
}

fn invoke(trampoline: Trampoline, context: &ContextPtr, event: &Event) {
    let ctx = context.as_raw();
    match (trampoline, event) {
        (Trampoline::DatabaseChange(f), Event::DatabaseChange { doc_ids }) => {
            let ids: Vec<CString> = doc_ids.iter().filter_map(|id| c_string(id)).collect();
            let ptrs: Vec<*const c_char> = ids.iter().map(|id| id.as_ptr()).collect();
            f(ctx, ptrs.len() as c_uint, ptrs.as_ptr());
        }
        (Trampoline::DocumentChange(f), Event::DocumentChange { doc_id }) => {
            if let Some(id) = c_string(doc_id) {
                f(ctx, id.as_ptr());
            }
        }
        (Trampoline::QueryChange(f), Event::QueryChange { rows, .. }) => {
            f(ctx, rows as *const NativeArray);
        }
        (Trampoline::ReplicatorChange(f), Event::ReplicatorChange { status, .. }) => {
            f(ctx, status as *const NativeReplicatorStatus);
        }
        (Trampoline::ReplicatedDocument(f), Event::ReplicatedDocuments { is_push, docs, .. }) => {
            let ids: Vec<Option<CString>> = docs.iter().map(|doc| c_string(&doc.id)).collect();
            let native: Vec<NativeReplicatedDocument> = docs
                .iter()
                .zip(&ids)
                .filter_map(|(doc, id)| {
                    id.as_ref().map(|id| NativeReplicatedDocument {
                        id: id.as_ptr(),
                        flags: doc.flags.0,
                        error: doc.error.unwrap_or_default(),
                    })
                })
                .collect();
            f(ctx, *is_push, native.len() as c_uint, native.as_ptr());
        }
        _ => {}
    }
}

fn run_worker(shared: Arc<Shared>, commands: Receiver<Command>) {
    for command in commands {
        match command {
            Command::Event(event) => shared.dispatch(event),
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Shutdown => break,
        }
    }
}

/// An engine kept entirely in memory.
///
/// Change notifications are delivered from a dedicated worker thread, in
/// the order they were raised. Replication filters and conflict resolvers
/// run synchronously on the thread that asks for them.
pub struct MemoryEngine {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryEngine {
    /// Start an engine and its notification worker.
    pub fn new(config: EngineConfig) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            listeners: RwLock::new(BTreeMap::new()),
            next_listener: AtomicU64::new(1),
            documents: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            buffering: Mutex::new(None),
            blobs: Arc::new(BlobStore::new(config.max_blob_size)),
        });
        let (commands, receiver) = unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(config.worker_name)
            .spawn(move || run_worker(worker_shared, receiver))?;

        Ok(Self {
            shared,
            commands,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn raise(&self, event: Event) {
        if self.commands.send(Command::Event(event)).is_err() {
            tracing::warn!("notification worker stopped; event dropped");
        }
    }

    /// Block until every notification raised so far has been delivered or
    /// queued.
    pub fn flush(&self) {
        let (done, wait) = crossbeam_channel::bounded(1);
        if self.commands.send(Command::Flush(done)).is_ok() {
            let _ = wait.recv();
        }
    }

    /// Number of live registrations, including the buffering listener.
    pub fn listener_count(&self) -> usize {
        let buffered = self.shared.buffering.lock().is_some() as usize;
        self.shared.listeners.read().len() + buffered
    }

    /// Delete a document. Returns false if it did not exist.
    pub fn delete_document(&self, id: &str) -> bool {
        let removed = self.shared.documents.write().remove(id).is_some();
        if removed {
            self.shared.sequence.fetch_add(1, Ordering::SeqCst);
            self.raise_document_events(id);
        }
        removed
    }

    fn raise_document_events(&self, id: &str) {
        self.raise(Event::DatabaseChange {
            doc_ids: vec![id.to_string()],
        });
        self.raise(Event::DocumentChange {
            doc_id: id.to_string(),
        });
    }

    /// Report new results for a live query.
    pub fn emit_query_change(&self, query: &str, rows: NativeArray) {
        self.raise(Event::QueryChange {
            query: query.to_string(),
            rows,
        });
    }

    /// Report a replicator status change.
    pub fn emit_replicator_status(&self, replicator: &str, status: NativeReplicatorStatus) {
        self.raise(Event::ReplicatorChange {
            replicator: replicator.to_string(),
            status,
        });
    }

    /// Report a batch of pushed or pulled documents.
    pub fn emit_replicated_documents(
        &self,
        replicator: &str,
        is_push: bool,
        docs: Vec<ReplicatedDocument>,
    ) {
        self.raise(Event::ReplicatedDocuments {
            replicator: replicator.to_string(),
            is_push,
            docs,
        });
    }

    /// Ask the replicator's push or pull filter whether to replicate `doc`.
    /// Documents pass when no filter is installed.
    pub fn filter_document(
        &self,
        replicator: &str,
        is_push: bool,
        doc: &Arc<NativeDocument>,
        is_deleted: bool,
    ) -> bool {
        let selected = self.shared.latest_for(replicator, |trampoline| {
            matches!(
                (is_push, trampoline),
                (true, Trampoline::PushFilter(_)) | (false, Trampoline::PullFilter(_))
            )
        });
        match selected {
            Some((Trampoline::PushFilter(f), context)) | Some((Trampoline::PullFilter(f), context)) => {
                f(context.as_raw(), Arc::as_ptr(doc), is_deleted)
            }
            _ => true,
        }
    }

    /// Settle a conflict between the stored revision of `doc_id` and a
    /// remote one. Without a resolver the local revision wins.
    ///
    /// Returns the document as stored afterwards, or `None` if the
    /// resolution deleted it.
    pub fn resolve_conflict(
        &self,
        replicator: &str,
        doc_id: &str,
        remote: NativeDict,
    ) -> Result<Option<Arc<NativeDocument>>, NativeError> {
        let local = self.document(doc_id);
        let selected = self
            .shared
            .latest_for(replicator, |t| matches!(t, Trampoline::ConflictResolver(_)));
        let (resolver, context) = match selected {
            Some((Trampoline::ConflictResolver(f), context)) => (f, context),
            _ => return Ok(local),
        };

        let id = CString::new(doc_id)
            .map_err(|_| NativeError::new(ErrorDomain::Engine, codes::INVALID_PARAMETER))?;
        let remote = Arc::new(NativeDocument::new(doc_id, 0, remote));
        let local_ptr = local.as_ref().map_or(ptr::null(), Arc::as_ptr);

        let raw = resolver(context.as_raw(), id.as_ptr(), local_ptr, Arc::as_ptr(&remote));
        // SAFETY: resolvers return a +1 reference or null.
        let resolved = unsafe { NativeDocument::adopt_raw(raw) };

        match resolved {
            None => {
                self.delete_document(doc_id);
                Ok(None)
            }
            Some(doc) => {
                let unchanged = local
                    .as_ref()
                    .map_or(false, |current| Arc::ptr_eq(current, &doc));
                if unchanged {
                    Ok(local)
                } else {
                    self.save_document(doc_id, doc.properties().clone()).map(Some)
                }
            }
        }
    }
}

impl Engine for MemoryEngine {
    fn add_listener(
        &self,
        target: ListenerTarget,
        trampoline: Trampoline,
        context: ContextPtr,
    ) -> Result<NativeListener, NativeError> {
        let valid = match trampoline {
            Trampoline::DatabaseChange(_) => target == ListenerTarget::Database,
            Trampoline::DocumentChange(_) => matches!(target, ListenerTarget::Document(_)),
            Trampoline::QueryChange(_) => matches!(target, ListenerTarget::Query(_)),
            _ => matches!(target, ListenerTarget::Replicator(_)),
        };
        if !valid {
            return Err(NativeError::new(ErrorDomain::Engine, codes::INVALID_PARAMETER));
        }

        let id = self.shared.next_id();
        self.shared.listeners.write().insert(
            id,
            Registration {
                target,
                trampoline,
                context,
            },
        );
        Ok(NativeListener::new(id))
    }

    fn remove_listener(&self, listener: NativeListener) -> bool {
        let id = listener.id();
        if self.shared.listeners.write().remove(&id).is_some() {
            return true;
        }

        let ended = {
            let mut buffering = self.shared.buffering.lock();
            match buffering.as_ref() {
                Some(buffer) if buffer.listener == id => buffering.take(),
                _ => None,
            }
        };
        match ended {
            Some(buffer) => {
                buffer.pending.iter().for_each(Delivery::deliver);
                true
            }
            None => false,
        }
    }

    fn buffer_notifications(
        &self,
        callback: NotificationReadyFn,
        context: ContextPtr,
    ) -> NativeListener {
        let id = self.shared.next_id();
        let previous = self.shared.buffering.lock().replace(Buffering {
            listener: id,
            callback,
            context,
            pending: Vec::new(),
            signalled: false,
        });
        if let Some(previous) = previous {
            previous.pending.iter().for_each(Delivery::deliver);
        }
        NativeListener::new(id)
    }

    fn send_notifications(&self) {
        let pending = match self.shared.buffering.lock().as_mut() {
            Some(buffer) => {
                buffer.signalled = false;
                std::mem::take(&mut buffer.pending)
            }
            None => return,
        };
        pending.iter().for_each(Delivery::deliver);
    }

    fn document(&self, id: &str) -> Option<Arc<NativeDocument>> {
        self.shared.documents.read().get(id).cloned()
    }

    fn save_document(
        &self,
        id: &str,
        properties: NativeDict,
    ) -> Result<Arc<NativeDocument>, NativeError> {
        if id.is_empty() || id.contains('\0') {
            return Err(NativeError::new(ErrorDomain::Engine, codes::INVALID_PARAMETER));
        }
        let sequence = self.shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let doc = Arc::new(NativeDocument::new(id, sequence, properties));
        self.shared
            .documents
            .write()
            .insert(id.to_string(), Arc::clone(&doc));
        self.raise_document_events(id);
        Ok(doc)
    }

    fn blob_store(&self) -> Arc<BlobStore> {
        Arc::clone(&self.shared.blobs)
    }
}

impl Drop for MemoryEngine {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}
