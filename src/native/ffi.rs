//! C-ABI surface shared with the engine: error and status structs, document
//! handles, callback signatures, and the context pointer carried through them.

use super::value::{NativeArray, NativeDict};
use serde::{Deserialize, Serialize};
use std::ffi::{c_char, c_uint, c_void};
use std::fmt;
use std::sync::Arc;

/// Engine error codes (domain [`ErrorDomain::Engine`]).
pub mod codes {
    pub const NOT_OPEN: i32 = 6;
    pub const NOT_FOUND: i32 = 7;
    pub const INVALID_PARAMETER: i32 = 9;
    pub const IO_ERROR: i32 = 12;
    /// POSIX `EFBIG`, reported in [`super::ErrorDomain::Posix`].
    pub const FILE_TOO_LARGE: i32 = 27;
}

/// Error domains reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorDomain {
    Engine,
    Posix,
    Sqlite,
    Fleece,
    Network,
    WebSocket,
    Unknown(u32),
}

impl ErrorDomain {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => ErrorDomain::Engine,
            2 => ErrorDomain::Posix,
            3 => ErrorDomain::Sqlite,
            4 => ErrorDomain::Fleece,
            5 => ErrorDomain::Network,
            6 => ErrorDomain::WebSocket,
            other => ErrorDomain::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            ErrorDomain::Engine => 1,
            ErrorDomain::Posix => 2,
            ErrorDomain::Sqlite => 3,
            ErrorDomain::Fleece => 4,
            ErrorDomain::Network => 5,
            ErrorDomain::WebSocket => 6,
            ErrorDomain::Unknown(other) => other,
        }
    }
}

/// Error as reported across the boundary. A zero code means success.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeError {
    pub domain: u32,
    pub code: i32,
    pub internal_info: u32,
}

impl NativeError {
    pub fn new(domain: ErrorDomain, code: i32) -> Self {
        Self {
            domain: domain.to_raw(),
            code,
            internal_info: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    pub fn domain(&self) -> ErrorDomain {
        ErrorDomain::from_raw(self.domain)
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain {:?} code {}", self.domain(), self.code)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NativeProgress {
    pub fraction_complete: f32,
    pub document_count: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NativeReplicatorStatus {
    pub activity: u8,
    pub progress: NativeProgress,
    pub error: NativeError,
}

/// Per-document replication report. `id` is a NUL-terminated string owned
/// by the engine for the duration of the callback.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct NativeReplicatedDocument {
    pub id: *const c_char,
    pub flags: u32,
    pub error: NativeError,
}

/// A stored document revision.
#[derive(Debug)]
pub struct NativeDocument {
    id: String,
    sequence: u64,
    properties: NativeDict,
}

impl NativeDocument {
    pub fn new(id: impl Into<String>, sequence: u64, properties: NativeDict) -> Self {
        Self {
            id: id.into(),
            sequence,
            properties,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn properties(&self) -> &NativeDict {
        &self.properties
    }

    /// Hand a reference to the engine as a raw pointer (+1).
    pub fn into_raw(doc: Arc<NativeDocument>) -> *const NativeDocument {
        Arc::into_raw(doc)
    }

    /// Add a reference to a borrowed document pointer and return it (+1).
    ///
    /// # Safety
    /// `ptr` must be null or point to a live document produced by
    /// [`NativeDocument::into_raw`] or `Arc::as_ptr`.
    pub unsafe fn retain_raw(ptr: *const NativeDocument) -> *const NativeDocument {
        if !ptr.is_null() {
            Arc::increment_strong_count(ptr);
        }
        ptr
    }

    /// Adopt a +1 reference previously handed out as a raw pointer.
    ///
    /// # Safety
    /// `ptr` must be null or carry a reference produced by
    /// [`NativeDocument::into_raw`] or [`NativeDocument::retain_raw`] that
    /// has not been adopted yet.
    pub unsafe fn adopt_raw(ptr: *const NativeDocument) -> Option<Arc<NativeDocument>> {
        if ptr.is_null() {
            None
        } else {
            Some(Arc::from_raw(ptr))
        }
    }

    /// Borrow a document from a raw callback argument.
    ///
    /// # Safety
    /// `ptr` must be null or point to a document that outlives `'a`.
    pub unsafe fn borrow_raw<'a>(ptr: *const NativeDocument) -> Option<&'a NativeDocument> {
        ptr.as_ref()
    }
}

pub type DatabaseChangeFn =
    extern "C" fn(context: *mut c_void, num_docs: c_uint, doc_ids: *const *const c_char);
pub type DocumentChangeFn = extern "C" fn(context: *mut c_void, doc_id: *const c_char);
pub type QueryChangeFn = extern "C" fn(context: *mut c_void, rows: *const NativeArray);
pub type NotificationReadyFn = extern "C" fn(context: *mut c_void);
pub type ReplicationFilterFn =
    extern "C" fn(context: *mut c_void, doc: *const NativeDocument, is_deleted: bool) -> bool;
pub type ReplicatorChangeFn =
    extern "C" fn(context: *mut c_void, status: *const NativeReplicatorStatus);
pub type ReplicatedDocumentFn = extern "C" fn(
    context: *mut c_void,
    is_push: bool,
    num_docs: c_uint,
    docs: *const NativeReplicatedDocument,
);
/// Returns a +1 reference the engine adopts, or null to delete the document.
pub type ConflictResolverFn = extern "C" fn(
    context: *mut c_void,
    doc_id: *const c_char,
    local: *const NativeDocument,
    remote: *const NativeDocument,
) -> *const NativeDocument;

/// The marshaled context of one registration, owned by the engine.
///
/// Holds one reference to the context dictionary; dropping it releases
/// that reference. Clones are independent references, which is how an
/// in-flight event keeps its context alive across a concurrent removal.
#[derive(Clone, Debug)]
pub struct ContextPtr {
    dict: NativeDict,
}

impl ContextPtr {
    pub fn new(dict: NativeDict) -> Self {
        Self { dict }
    }

    /// The `void *` handed to trampolines.
    pub fn as_raw(&self) -> *mut c_void {
        self.dict.as_raw()
    }

    pub fn dict(&self) -> &NativeDict {
        &self.dict
    }
}

/// Engine-side handle of one listener registration.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct NativeListener(u64);

impl NativeListener {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}
