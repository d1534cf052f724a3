//! Process-wide directory of live sessions.
//!
//! Contexts carry a session id rather than a pointer; trampolines resolve
//! it here. Entries are weak, so the directory never keeps a session alive.

use super::Dispatcher;
use parking_lot::{const_rwlock, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static DIRECTORY: RwLock<BTreeMap<u64, Weak<Dispatcher>>> = const_rwlock(BTreeMap::new());
static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_session_id() -> u64 {
    NEXT_SESSION.fetch_add(1, Ordering::SeqCst)
}

pub(crate) fn register(dispatcher: &Arc<Dispatcher>) {
    DIRECTORY
        .write()
        .insert(dispatcher.id(), Arc::downgrade(dispatcher));
}

pub(crate) fn unregister(id: u64) -> bool {
    DIRECTORY.write().remove(&id).is_some()
}

pub(crate) fn lookup(id: u64) -> Option<Arc<Dispatcher>> {
    DIRECTORY.read().get(&id).and_then(Weak::upgrade)
}

/// Number of sessions currently reachable by dispatch.
pub fn live_sessions() -> usize {
    DIRECTORY
        .read()
        .values()
        .filter(|entry| entry.strong_count() > 0)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::{ValueReader, ValueWriter};

    #[test]
    fn test_register_lookup_unregister() {
        let id = next_session_id();
        let dispatcher = Arc::new(Dispatcher::new(id, ValueReader::default(), ValueWriter::default()));

        register(&dispatcher);
        assert_eq!(lookup(id).map(|d| d.id()), Some(id));

        assert!(unregister(id));
        assert!(lookup(id).is_none());
        assert!(!unregister(id));
    }

    #[test]
    fn test_entries_are_weak() {
        let id = next_session_id();
        let dispatcher = Arc::new(Dispatcher::new(id, ValueReader::default(), ValueWriter::default()));
        register(&dispatcher);
        drop(dispatcher);

        assert!(lookup(id).is_none());
        unregister(id);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = next_session_id();
        let b = next_session_id();
        assert_ne!(a, b);
    }
}
