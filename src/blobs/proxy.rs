//! Host-side blob proxy.

use super::storage::{BlobStore, NativeBlob, NativeBlobReader, NativeBlobWriter};
use crate::error::{BridgeError, Result};
use crate::native::NativeDict;
use crate::types::Value;
use crate::values::ValueReader;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A binary attachment referenced from a document.
///
/// Cloning shares the underlying engine handle, which is released when the
/// last clone is dropped.
#[derive(Clone)]
pub struct Blob {
    native: Arc<NativeBlob>,
    properties: BTreeMap<String, Value>,
}

impl Blob {
    /// Resolve a blob-reference dictionary into a blob.
    pub fn metadata_of(dict: &NativeDict, store: Option<Arc<BlobStore>>) -> Result<Blob> {
        let native = NativeBlob::get(dict, store.clone()).ok_or_else(|| {
            BridgeError::BlobResolutionFailed("dictionary is not a blob reference".into())
        })?;
        let reader = ValueReader::default().with_blob_store(store);
        let properties = reader
            .read_dict(dict)
            .map_err(|e| BridgeError::BlobResolutionFailed(e.to_string()))?;
        Ok(Blob {
            native: Arc::new(native),
            properties,
        })
    }

    /// Create a blob from an in-memory buffer.
    pub fn create_from_bytes(
        store: &Arc<BlobStore>,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<Blob> {
        let native = NativeBlob::create_with_data(store, content_type, bytes)
            .map_err(BridgeError::blob_io)?;
        Self::from_native(native)
    }

    /// Create a blob from everything written to `stream`. The stream is
    /// consumed and must not be closed afterwards.
    pub fn create_from_stream(content_type: Option<&str>, stream: BlobWriteStream) -> Result<Blob> {
        let native = NativeBlob::create_with_stream(content_type, stream.inner)
            .map_err(BridgeError::blob_io)?;
        Self::from_native(native)
    }

    fn from_native(native: NativeBlob) -> Result<Blob> {
        let properties = ValueReader::default()
            .read_dict(native.properties())
            .map_err(|e| BridgeError::BlobResolutionFailed(e.to_string()))?;
        Ok(Blob {
            native: Arc::new(native),
            properties,
        })
    }

    pub fn digest(&self) -> &str {
        self.native.digest()
    }

    pub fn length(&self) -> u64 {
        self.native.length()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.native.content_type()
    }

    /// Full metadata, including custom keys.
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    pub fn native(&self) -> &NativeBlob {
        &self.native
    }

    /// Read the whole content into memory. Use [`Blob::open_reader`] for
    /// bounded memory.
    pub fn load(&self) -> Result<Vec<u8>> {
        self.native
            .load_content()
            .map(|content| content.to_vec())
            .map_err(BridgeError::blob_io)
    }

    pub fn open_reader(&self) -> Result<BlobReadStream> {
        let inner = self
            .native
            .open_content_stream()
            .map_err(BridgeError::blob_io)?;
        Ok(BlobReadStream { inner })
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.properties == other.properties
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("digest", &self.digest())
            .field("length", &self.length())
            .field("content_type", &self.content_type())
            .finish()
    }
}

/// Stream over a blob's content. Closed exactly once: explicitly through
/// [`BlobReadStream::close`] or on drop.
#[derive(Debug)]
pub struct BlobReadStream {
    inner: NativeBlobReader,
}

impl BlobReadStream {
    /// Read into `buf`; returns 0 at end of data.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf).map_err(BridgeError::blob_io)
    }

    /// Read everything that remains.
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut chunk = [0u8; 8192];
        let mut total = 0;
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&chunk[..n]);
            total += n;
        }
    }

    pub fn close(self) {}
}

impl Drop for BlobReadStream {
    fn drop(&mut self) {
        if self.inner.is_open() {
            self.inner.close();
        }
    }
}

/// Stream for writing a new blob.
pub struct BlobWriteStream {
    inner: NativeBlobWriter,
}

impl BlobWriteStream {
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self {
            inner: NativeBlobWriter::new(store),
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write(bytes).map_err(BridgeError::blob_io)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Abandon the write without creating a blob.
    pub fn close(self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{codes, ErrorDomain, MutableDict};

    #[test]
    fn test_create_from_bytes_and_load() {
        let store = Arc::new(BlobStore::default());
        let blob = Blob::create_from_bytes(&store, Some("text/plain"), b"hello").unwrap();

        assert_eq!(blob.length(), 5);
        assert_eq!(blob.content_type(), Some("text/plain"));
        assert_eq!(blob.load().unwrap(), b"hello");
        assert_eq!(
            blob.properties().get("@type"),
            Some(&Value::String("blob".into()))
        );
    }

    #[test]
    fn test_stream_roundtrip() {
        let store = Arc::new(BlobStore::default());
        let mut writer = BlobWriteStream::new(Arc::clone(&store));
        for chunk in [b"one ".as_slice(), b"two ", b"three"] {
            writer.write(chunk).unwrap();
        }
        let blob = Blob::create_from_stream(Some("text/plain"), writer).unwrap();

        let mut reader = blob.open_reader().unwrap();
        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).unwrap(), 13);
        reader.close();
        assert_eq!(out, b"one two three");
    }

    #[test]
    fn test_abandoned_writer_stores_nothing() {
        let store = Arc::new(BlobStore::default());
        let mut writer = BlobWriteStream::new(Arc::clone(&store));
        writer.write(b"discard me").unwrap();
        writer.close();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_metadata_of_rejects_plain_dict() {
        let mut dict = MutableDict::new();
        dict.set("digest").set_string("sha256-00");
        let err = Blob::metadata_of(&dict.into_dict(), None).unwrap_err();
        assert!(matches!(err, BridgeError::BlobResolutionFailed(_)));
    }

    #[test]
    fn test_load_without_store_is_io_error() {
        let mut dict = MutableDict::new();
        dict.set("@type").set_string("blob");
        dict.set("digest").set_string("sha256-00");
        dict.set("length").set_uint(5);
        let blob = Blob::metadata_of(&dict.into_dict(), None).unwrap();

        match blob.load() {
            Err(BridgeError::BlobIoError { domain, code }) => {
                assert_eq!(domain, ErrorDomain::Engine);
                assert_eq!(code, codes::NOT_FOUND);
            }
            other => panic!("Expected BlobIoError, got {:?}", other),
        }
    }
}
