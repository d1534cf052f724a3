//! Engine-side blob storage and native blob handles.

use crate::native::{
    codes, ErrorDomain, MutableDict, NativeDict, NativeError, NativeValue, BLOB_CONTENT_TYPE_PROPERTY,
    BLOB_DIGEST_PROPERTY, BLOB_LENGTH_PROPERTY, BLOB_TYPE, BLOB_TYPE_PROPERTY,
};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Prefix of every digest produced by [`BlobStore`].
pub const DIGEST_PREFIX: &str = "sha256-";

/// Default cap on a single blob's size (64MB).
pub const DEFAULT_MAX_BLOB_SIZE: usize = 64 * 1024 * 1024;

fn not_found() -> NativeError {
    NativeError::new(ErrorDomain::Engine, codes::NOT_FOUND)
}

fn too_large() -> NativeError {
    NativeError::new(ErrorDomain::Posix, codes::FILE_TOO_LARGE)
}

fn not_open() -> NativeError {
    NativeError::new(ErrorDomain::Engine, codes::NOT_OPEN)
}

/// Content-addressed blob storage.
///
/// Blobs are keyed by the SHA-256 digest of their content; storing the
/// same content twice is a no-op.
pub struct BlobStore {
    blobs: RwLock<HashMap<String, Arc<[u8]>>>,
    max_blob_size: usize,
}

impl BlobStore {
    pub fn new(max_blob_size: usize) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            max_blob_size,
        }
    }

    /// Digest string for some content.
    pub fn digest_of(content: &[u8]) -> String {
        format!("{}{}", DIGEST_PREFIX, hex::encode(Sha256::digest(content)))
    }

    pub fn max_blob_size(&self) -> usize {
        self.max_blob_size
    }

    /// Store content, returning its digest.
    pub fn store(&self, content: &[u8]) -> Result<String, NativeError> {
        if content.len() > self.max_blob_size {
            return Err(too_large());
        }
        let digest = Self::digest_of(content);
        self.insert(digest.clone(), content);
        Ok(digest)
    }

    fn insert(&self, digest: String, content: &[u8]) {
        let mut blobs = self.blobs.write();
        blobs.entry(digest).or_insert_with(|| Arc::from(content));
    }

    pub fn get(&self, digest: &str) -> Option<Arc<[u8]>> {
        self.blobs.read().get(digest).cloned()
    }

    pub fn exists(&self, digest: &str) -> bool {
        self.blobs.read().contains_key(digest)
    }

    /// Delete a blob (for garbage collection).
    pub fn delete(&self, digest: &str) -> bool {
        self.blobs.write().remove(digest).is_some()
    }

    pub fn list(&self) -> Vec<String> {
        self.blobs.read().keys().cloned().collect()
    }

    /// Total bytes of stored content.
    pub fn total_size(&self) -> u64 {
        self.blobs.read().values().map(|b| b.len() as u64).sum()
    }
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BLOB_SIZE)
    }
}

impl fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStore")
            .field("blobs", &self.blobs.read().len())
            .field("max_blob_size", &self.max_blob_size)
            .finish()
    }
}

/// Engine handle for one blob: its metadata dictionary plus the store that
/// holds its content, when known.
#[derive(Debug)]
pub struct NativeBlob {
    properties: NativeDict,
    store: Option<Arc<BlobStore>>,
}

impl NativeBlob {
    /// Resolve a blob-reference dictionary. Returns `None` unless the
    /// dictionary carries the blob marker and a string digest.
    pub fn get(dict: &NativeDict, store: Option<Arc<BlobStore>>) -> Option<NativeBlob> {
        if !dict.is_blob() {
            return None;
        }
        dict.get(BLOB_DIGEST_PROPERTY)?.as_string()?;
        Some(NativeBlob {
            properties: dict.clone(),
            store,
        })
    }

    /// Create a blob from in-memory content; the content is stored at once.
    pub fn create_with_data(
        store: &Arc<BlobStore>,
        content_type: Option<&str>,
        content: &[u8],
    ) -> Result<NativeBlob, NativeError> {
        let digest = store.store(content)?;
        Ok(Self::with_metadata(store, &digest, content.len() as u64, content_type))
    }

    /// Finalize a write stream into a blob. The stream is consumed.
    pub fn create_with_stream(
        content_type: Option<&str>,
        writer: NativeBlobWriter,
    ) -> Result<NativeBlob, NativeError> {
        let NativeBlobWriter {
            store,
            buffer,
            hasher,
            ..
        } = writer;
        let digest = format!("{}{}", DIGEST_PREFIX, hex::encode(hasher.finalize()));
        store.insert(digest.clone(), &buffer);
        Ok(Self::with_metadata(&store, &digest, buffer.len() as u64, content_type))
    }

    fn with_metadata(
        store: &Arc<BlobStore>,
        digest: &str,
        length: u64,
        content_type: Option<&str>,
    ) -> NativeBlob {
        let mut props = MutableDict::new();
        props.set(BLOB_TYPE_PROPERTY).set_string(BLOB_TYPE);
        props.set(BLOB_DIGEST_PROPERTY).set_string(digest);
        props.set(BLOB_LENGTH_PROPERTY).set_uint(length);
        if let Some(content_type) = content_type {
            props.set(BLOB_CONTENT_TYPE_PROPERTY).set_string(content_type);
        }
        NativeBlob {
            properties: props.into_dict(),
            store: Some(Arc::clone(store)),
        }
    }

    pub fn properties(&self) -> &NativeDict {
        &self.properties
    }

    pub fn digest(&self) -> &str {
        self.properties
            .get(BLOB_DIGEST_PROPERTY)
            .and_then(NativeValue::as_string)
            .unwrap_or_default()
    }

    pub fn length(&self) -> u64 {
        self.properties
            .get(BLOB_LENGTH_PROPERTY)
            .map(NativeValue::as_unsigned)
            .unwrap_or(0)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.properties
            .get(BLOB_CONTENT_TYPE_PROPERTY)
            .and_then(NativeValue::as_string)
    }

    /// Read the whole content into memory.
    pub fn load_content(&self) -> Result<Arc<[u8]>, NativeError> {
        self.store
            .as_ref()
            .and_then(|store| store.get(self.digest()))
            .ok_or_else(not_found)
    }

    pub fn open_content_stream(&self) -> Result<NativeBlobReader, NativeError> {
        Ok(NativeBlobReader {
            content: self.load_content()?,
            position: 0,
            open: true,
        })
    }
}

/// Engine stream over a blob's content.
#[derive(Debug)]
pub struct NativeBlobReader {
    content: Arc<[u8]>,
    position: usize,
    open: bool,
}

impl NativeBlobReader {
    /// Copy up to `dst.len()` bytes; returns 0 at end of data.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, NativeError> {
        if !self.open {
            return Err(not_open());
        }
        let remaining = &self.content[self.position..];
        let n = remaining.len().min(dst.len());
        dst[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// Engine stream accumulating a new blob.
pub struct NativeBlobWriter {
    store: Arc<BlobStore>,
    buffer: Vec<u8>,
    hasher: Sha256,
}

impl NativeBlobWriter {
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self {
            store,
            buffer: Vec::new(),
            hasher: Sha256::new(),
        }
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), NativeError> {
        if self.buffer.len() + data.len() > self.store.max_blob_size() {
            return Err(too_large());
        }
        self.buffer.extend_from_slice(data);
        self.hasher.update(data);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Abandon the write; nothing is stored.
    pub fn close(self) {}
}
