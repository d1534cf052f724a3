//! Listener registration plumbing and engine-to-host dispatch.
//!
//! A registration packs its context, token included, into an engine
//! dictionary that travels through the engine as the callback's `void *`.
//! When the engine calls one of the [`trampolines`], the context is
//! unpacked, the owning session is found through its id, and the callback
//! registered under the token is invoked with translated arguments.

mod context;
mod registry;
mod sessions;
pub mod trampolines;

pub use context::{pack, unpack};
pub use registry::{
    ConflictResolverCallback, DatabaseChangeCallback, DocumentChangeCallback,
    NotificationReadyCallback, NotificationSlot, QueryChangeCallback, Registries, Registry,
    ReplicatedDocumentCallback, ReplicationFilterCallback, ReplicatorChangeCallback,
};
pub use sessions::live_sessions;
pub(crate) use sessions::{lookup, next_session_id, register, unregister};

use crate::error::{BridgeError, Result};
use crate::native::{NativeDict, NativeDocument, NativeValue};
use crate::types::{Document, ExecutionContext, ListenerKind, SESSION_KEY};
use crate::values::{ValueReader, ValueWriter};
use serde::Serialize;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of dispatch outcomes.
#[derive(Debug, Default)]
pub struct DispatchStats {
    delivered: AtomicU64,
    missing_token: AtomicU64,
    unregistered: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    /// Events handed to a registered callback.
    pub delivered: u64,
    /// Events whose context carried no token.
    pub missing_token: u64,
    /// Events for a token with no registered callback.
    pub unregistered: u64,
    /// Events dropped because their arguments could not be translated.
    pub failed: u64,
    /// Callbacks that panicked.
    pub panicked: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            missing_token: self.missing_token.load(Ordering::Relaxed),
            unregistered: self.unregistered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The dispatch side of one session: its registries and the converters
/// used to translate callback arguments.
pub struct Dispatcher {
    id: u64,
    registries: Registries,
    stats: DispatchStats,
    reader: ValueReader,
    writer: ValueWriter,
}

impl Dispatcher {
    pub fn new(id: u64, reader: ValueReader, writer: ValueWriter) -> Self {
        Self {
            id,
            registries: Registries::new(),
            stats: DispatchStats::default(),
            reader,
            writer,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn reader(&self) -> &ValueReader {
        &self.reader
    }

    pub fn writer(&self) -> &ValueWriter {
        &self.writer
    }

    /// Decode an engine document with nested properties.
    pub fn read_document(&self, doc: &NativeDocument) -> Result<Document> {
        Ok(Document {
            id: doc.id().to_string(),
            sequence: doc.sequence(),
            properties: self.reader.read_dict(doc.properties())?,
        })
    }
}

/// Route one engine callback to the host.
///
/// `call` receives the session's dispatcher, the unpacked context and the
/// token. It returns `Ok(None)` when no callback is registered for the
/// token and `Err` when the event's arguments could not be translated.
/// Every failure is logged and counted here; none reaches the engine.
pub(crate) fn dispatch<R>(
    raw_context: *mut c_void,
    kind: ListenerKind,
    call: impl FnOnce(&Dispatcher, &ExecutionContext, &str) -> Result<Option<R>>,
) -> Option<R> {
    // SAFETY: the engine passes back the pointer it was registered with and
    // keeps that context alive for the duration of the callback.
    let dict = match unsafe { NativeDict::retain_raw(raw_context) } {
        Some(dict) => dict,
        None => {
            tracing::warn!(kind = %kind, "callback invoked without a context");
            return None;
        }
    };

    let session = match dict.get(SESSION_KEY) {
        Some(NativeValue::UInt(id)) => *id,
        _ => {
            tracing::debug!(kind = %kind, "context names no session; event dropped");
            return None;
        }
    };
    let dispatcher = match lookup(session) {
        Some(dispatcher) => dispatcher,
        None => {
            tracing::debug!(kind = %kind, session, "session closed; event dropped");
            return None;
        }
    };

    let context = match unpack(&dict, &dispatcher.reader) {
        Ok(context) => context,
        Err(error) => {
            DispatchStats::bump(&dispatcher.stats.failed);
            tracing::warn!(kind = %kind, session, %error, "context could not be unpacked");
            return None;
        }
    };
    let token = match context.token() {
        Some(token) => token.to_string(),
        None => {
            DispatchStats::bump(&dispatcher.stats.missing_token);
            tracing::warn!(kind = %kind, session, "{}", BridgeError::DispatchMissingToken);
            return None;
        }
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| call(&dispatcher, &context, &token)));
    match outcome {
        Ok(Ok(Some(result))) => {
            DispatchStats::bump(&dispatcher.stats.delivered);
            Some(result)
        }
        Ok(Ok(None)) => {
            DispatchStats::bump(&dispatcher.stats.unregistered);
            tracing::debug!(kind = %kind, session, token = %token, "no listener for token; event dropped");
            None
        }
        Ok(Err(error)) => {
            DispatchStats::bump(&dispatcher.stats.failed);
            tracing::warn!(kind = %kind, session, token = %token, %error, "event arguments could not be translated");
            None
        }
        Err(_) => {
            DispatchStats::bump(&dispatcher.stats.panicked);
            tracing::error!(kind = %kind, session, token = %token, "listener panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::MutableDict;

    #[test]
    fn test_stats_snapshot() {
        let stats = DispatchStats::default();
        DispatchStats::bump(&stats.delivered);
        DispatchStats::bump(&stats.delivered);
        DispatchStats::bump(&stats.panicked);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.delivered, 2);
        assert_eq!(snapshot.panicked, 1);
        assert_eq!(snapshot.missing_token, 0);
    }

    #[test]
    fn test_dispatch_without_session_is_dropped() {
        let mut dict = MutableDict::new();
        dict.set("uuid").set_string("T1");
        let dict = dict.into_dict();

        let called = dispatch(dict.as_raw(), ListenerKind::DatabaseChange, |_, _, _| {
            Ok(Some(()))
        });
        assert!(called.is_none());
    }

    #[test]
    fn test_dispatch_null_context() {
        let called = dispatch(std::ptr::null_mut(), ListenerKind::DatabaseChange, |_, _, _| {
            Ok(Some(()))
        });
        assert!(called.is_none());
    }

    #[test]
    fn test_read_document() {
        let dispatcher = Dispatcher::new(0, ValueReader::default(), ValueWriter::default());
        let mut props = MutableDict::new();
        props.set("n").set_int(900);
        let doc = NativeDocument::new("doc", 3, props.into_dict());

        let read = dispatcher.read_document(&doc).unwrap();
        assert_eq!(read.id, "doc");
        assert_eq!(read.sequence, 3);
        assert_eq!(read.get("n").and_then(|v| v.as_i64()), Some(900));
    }
}
