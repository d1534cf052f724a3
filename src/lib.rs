//! # docbridge
//!
//! A dynamic value bridge and cross-boundary callback dispatch layer for an
//! embedded document database engine.
//!
//! ## Core Concepts
//!
//! - **Values**: a tagged [`Value`] union converted to and from the engine's
//!   self-describing values, preserving numeric subtypes
//! - **Blobs**: out-of-line binary attachments referenced from documents
//! - **Listeners**: host callbacks the engine reaches through fixed C
//!   trampolines, routed by a token packed into the callback context
//! - **Sessions**: explicit-lifetime owners of a set of callback registries
//!
//! ## Example
//!
//! ```ignore
//! use docbridge::{EngineConfig, ExecutionContext, MemoryEngine, Session, SessionConfig};
//! use std::sync::Arc;
//!
//! let engine = Arc::new(MemoryEngine::new(EngineConfig::default())?);
//! let session = Session::new(engine.clone(), SessionConfig::default());
//!
//! let listener = session.add_document_change_listener(
//!     "doc42",
//!     ExecutionContext::new().with("pkg", "x"),
//!     &["pkg"],
//!     |ctx, doc_id| println!("{} changed ({:?})", doc_id, ctx.get("pkg")),
//! )?;
//!
//! session.save_json("doc42", r#"{"n": 900, "name": "Yoda"}"#)?;
//! engine.flush();
//! session.remove_listener(listener)?;
//! ```

pub mod blobs;
pub mod dispatch;
pub mod error;
pub mod native;
pub mod session;
pub mod types;
pub mod values;

// Re-exports
pub use blobs::{Blob, BlobReadStream, BlobStore, BlobWriteStream};
pub use dispatch::{DispatchStatsSnapshot, Dispatcher};
pub use error::{BridgeError, Result};
pub use native::{Engine, EngineConfig, MemoryEngine};
pub use session::{Session, SessionConfig};
pub use types::{
    ActivityLevel, ConflictResolution, Document, DocumentFlags, ExecutionContext, ListenerKind,
    ListenerToken, ReplicatedDocument, ReplicatorProgress, ReplicatorStatus, Value, SESSION_KEY,
    TOKEN_KEY,
};
pub use values::{to_value, ReadMode, ValueReader, ValueWriter};
