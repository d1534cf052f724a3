//! [`Value`] to native value encoding.
//!
//! Containers are built bottom-up in fresh builders and attached to their
//! parent slot once complete; attaching moves the container into the
//! parent, so nothing is left for the writer to release.

use super::DEFAULT_MAX_DEPTH;
use crate::error::{BridgeError, Result};
use crate::native::{MutableArray, MutableDict, NativeValue, Slot};
use crate::types::Value;
use std::collections::BTreeMap;

/// Encodes host values into engine containers.
#[derive(Clone, Copy, Debug)]
pub struct ValueWriter {
    max_depth: usize,
}

impl Default for ValueWriter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ValueWriter {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Write `value` into a dictionary entry or array append slot.
    pub fn write(&self, slot: Slot<'_>, value: &Value) -> Result<()> {
        self.write_at(slot, value, 0)
    }

    /// Encode a whole property map. Either every entry is encoded or the
    /// call fails and nothing is returned.
    pub fn write_dict(&self, entries: &BTreeMap<String, Value>) -> Result<MutableDict> {
        self.build_dict(entries, 0)
    }

    pub fn write_array(&self, items: &[Value]) -> Result<MutableArray> {
        self.build_array(items, 0)
    }

    /// Encode a single value outside any container.
    pub fn encode(&self, value: &Value) -> Result<NativeValue> {
        let mut holder = MutableArray::with_capacity(1);
        self.write(holder.append(), value)?;
        let array = holder.into_array();
        Ok(array.get(0).cloned().unwrap_or_default())
    }

    fn write_at(&self, slot: Slot<'_>, value: &Value, depth: usize) -> Result<()> {
        if depth > self.max_depth {
            return Err(BridgeError::DepthLimitExceeded(self.max_depth));
        }
        match value {
            Value::Null => slot.set_null(),
            Value::Bool(b) => slot.set_bool(*b),
            Value::Int(i) => slot.set_int(*i),
            Value::UInt(u) => slot.set_uint(*u),
            Value::Float32(f) => slot.set_float(*f),
            Value::Float64(f) => slot.set_double(*f),
            Value::String(s) => slot.set_string(s),
            Value::Bytes(bytes) => slot.set_data(bytes),
            Value::Array(items) => {
                let array = self.build_array(items, depth + 1)?;
                slot.set_array(array.into_array());
            }
            Value::Dict(entries) => {
                let dict = self.build_dict(entries, depth + 1)?;
                slot.set_dict(dict.into_dict());
            }
            Value::BlobRef(blob) => slot.set_blob(blob.native()),
        }
        Ok(())
    }

    fn build_array(&self, items: &[Value], depth: usize) -> Result<MutableArray> {
        let mut array = MutableArray::with_capacity(items.len());
        for item in items {
            self.write_at(array.append(), item, depth)?;
        }
        Ok(array)
    }

    fn build_dict(&self, entries: &BTreeMap<String, Value>, depth: usize) -> Result<MutableDict> {
        let mut dict = MutableDict::new();
        for (key, value) in entries {
            self.write_at(dict.set(key), value, depth)?;
        }
        Ok(dict)
    }
}
