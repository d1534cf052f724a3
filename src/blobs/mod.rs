//! Blob attachments.
//!
//! Blob content lives out of line in a content-addressed store keyed by
//! SHA-256 digest. Documents only carry a reference dictionary marked with
//! `"@type": "blob"`; [`Blob`] is the host-side proxy for such a reference.

mod proxy;
mod storage;

pub use proxy::{Blob, BlobReadStream, BlobWriteStream};
pub use storage::{
    BlobStore, NativeBlob, NativeBlobReader, NativeBlobWriter, DEFAULT_MAX_BLOB_SIZE,
    DIGEST_PREFIX,
};
