//! The engine side of the boundary.
//!
//! Dynamic values, the C-ABI callback surface, and [`MemoryEngine`], an
//! in-process engine that drives listeners through that surface.

mod engine;
mod ffi;
mod iter;
mod memory;
mod value;

pub use engine::{Engine, ListenerTarget, Trampoline};
pub use ffi::{
    codes, ConflictResolverFn, ContextPtr, DatabaseChangeFn, DocumentChangeFn, ErrorDomain,
    NativeDocument, NativeError, NativeListener, NativeProgress, NativeReplicatedDocument,
    NativeReplicatorStatus, NotificationReadyFn, QueryChangeFn, ReplicatedDocumentFn,
    ReplicationFilterFn, ReplicatorChangeFn,
};
pub use iter::{DeepEntry, DeepIter, PathComponent};
pub use memory::{EngineConfig, MemoryEngine};
pub use value::{
    MutableArray, MutableDict, NativeArray, NativeDict, NativeValue, Slot, ValueType,
    BLOB_CONTENT_TYPE_PROPERTY, BLOB_DIGEST_PROPERTY, BLOB_LENGTH_PROPERTY, BLOB_TYPE,
    BLOB_TYPE_PROPERTY,
};
