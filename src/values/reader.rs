//! Native value to [`Value`] decoding.

use super::DEFAULT_MAX_DEPTH;
use crate::blobs::{Blob, BlobStore};
use crate::error::{BridgeError, Result};
use crate::native::{DeepIter, NativeArray, NativeDict, NativeValue, PathComponent};
use crate::types::Value;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

/// How dictionaries are decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadMode {
    /// Per-key recursion; nested dictionaries stay nested.
    #[default]
    Nested,
    /// Deep traversal into a single-level map keyed by full path
    /// (see [`flatten_path`]).
    Flatten,
}

/// Decodes engine values into host values.
#[derive(Clone, Debug)]
pub struct ValueReader {
    max_depth: usize,
    blobs: Option<Arc<BlobStore>>,
}

impl Default for ValueReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ValueReader {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            blobs: None,
        }
    }

    /// Store used to back blob references found while reading.
    pub fn with_blob_store(mut self, store: Option<Arc<BlobStore>>) -> Self {
        self.blobs = store;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Decode a value, keeping nested structure.
    pub fn read(&self, value: &NativeValue) -> Result<Value> {
        self.read_at(value, 0)
    }

    /// Decode a value in the given mode. Only dictionaries are affected by
    /// the mode.
    pub fn read_with(&self, value: &NativeValue, mode: ReadMode) -> Result<Value> {
        match (mode, value) {
            (ReadMode::Flatten, NativeValue::Dict(dict)) if !dict.is_blob() => {
                self.read_flattened(dict).map(Value::Dict)
            }
            _ => self.read(value),
        }
    }

    /// Decode every entry of a dictionary, keeping nested structure.
    pub fn read_dict(&self, dict: &NativeDict) -> Result<BTreeMap<String, Value>> {
        self.read_entries(dict, 0)
    }

    pub fn read_array(&self, array: &NativeArray) -> Result<Vec<Value>> {
        self.read_items(array, 0)
    }

    /// Decode a dictionary into a single-level map whose keys are the full
    /// paths of its leaves.
    ///
    /// Leaves are scalars, blob references and empty containers; non-empty
    /// containers only contribute their children.
    pub fn read_flattened(&self, dict: &NativeDict) -> Result<BTreeMap<String, Value>> {
        self.read_flattened_with(dict, flatten_path)
    }

    /// Flattened read with a caller-chosen rendering of each leaf's path.
    pub(crate) fn read_flattened_with(
        &self,
        dict: &NativeDict,
        key_of: impl Fn(&[PathComponent]) -> String,
    ) -> Result<BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        let mut iter = DeepIter::new(dict);

        while let Some(entry) = iter.next() {
            let depth = entry.path.len();
            if depth > self.max_depth {
                return Err(BridgeError::DepthLimitExceeded(self.max_depth));
            }
            let leaf = match &entry.value {
                NativeValue::Dict(child) if child.is_blob() => {
                    iter.skip_children();
                    true
                }
                NativeValue::Dict(child) => child.is_empty(),
                NativeValue::Array(child) => child.is_empty(),
                _ => true,
            };
            if leaf {
                let value = self.read_at(&entry.value, depth)?;
                out.insert(key_of(entry.path.as_slice()), value);
            }
        }
        Ok(out)
    }

    fn check_depth(&self, depth: usize) -> Result<()> {
        if depth > self.max_depth {
            return Err(BridgeError::DepthLimitExceeded(self.max_depth));
        }
        Ok(())
    }

    fn read_at(&self, value: &NativeValue, depth: usize) -> Result<Value> {
        self.check_depth(depth)?;
        match value {
            NativeValue::Undefined | NativeValue::Null => Ok(Value::Null),
            NativeValue::Bool(b) => Ok(Value::Bool(*b)),
            NativeValue::Int(_)
            | NativeValue::UInt(_)
            | NativeValue::Float(_)
            | NativeValue::Double(_) => Ok(read_number(value)),
            NativeValue::String(s) => Ok(Value::String(s.to_string())),
            NativeValue::Data(bytes) => Ok(Value::Bytes(bytes.to_vec())),
            NativeValue::Array(array) => self.read_items(array, depth + 1).map(Value::Array),
            NativeValue::Dict(dict) if dict.is_blob() => self.read_blob(dict),
            NativeValue::Dict(dict) => self.read_entries(dict, depth + 1).map(Value::Dict),
            NativeValue::Opaque { tag } => Err(BridgeError::UnrecognizedType(*tag)),
        }
    }

    fn read_items(&self, array: &NativeArray, depth: usize) -> Result<Vec<Value>> {
        self.check_depth(depth)?;
        array.iter().map(|item| self.read_at(item, depth)).collect()
    }

    fn read_entries(&self, dict: &NativeDict, depth: usize) -> Result<BTreeMap<String, Value>> {
        self.check_depth(depth)?;
        dict.iter()
            .map(|(key, value)| Ok((key.clone(), self.read_at(value, depth)?)))
            .collect()
    }

    fn read_blob(&self, dict: &NativeDict) -> Result<Value> {
        Blob::metadata_of(dict, self.blobs.clone())
            .map(Value::BlobRef)
            .map_err(|_| BridgeError::BlobMetadataUnavailable)
    }
}

/// Numbers follow the engine's own classification, checked in this order.
fn read_number(value: &NativeValue) -> Value {
    if value.is_integer() {
        Value::Int(value.as_int())
    } else if value.is_unsigned() {
        Value::UInt(value.as_unsigned())
    } else if value.is_double() {
        Value::Float64(value.as_double())
    } else {
        Value::Float32(value.as_float())
    }
}

/// Render a path as a flattened key.
///
/// Keys are joined with `.` and array elements appended as `[i]`, so
/// `{"a": {"c": [2, 3]}}` yields `a.c[0]` and `a.c[1]`. The characters
/// `.`, `[`, `]` and `\` inside a key are escaped with `\`, which keeps
/// distinct paths distinct.
pub fn flatten_path(path: &[PathComponent]) -> String {
    let mut out = String::new();
    for (i, component) in path.iter().enumerate() {
        match component {
            PathComponent::Key(key) => {
                if i > 0 {
                    out.push('.');
                }
                for c in key.chars() {
                    if matches!(c, '.' | '[' | ']' | '\\') {
                        out.push('\\');
                    }
                    out.push(c);
                }
            }
            PathComponent::Index(index) => {
                let _ = write!(out, "[{}]", index);
            }
        }
    }
    out
}
