//! Context marshaling across the `void *` callback argument.

use crate::error::{BridgeError, Result};
use crate::native::{NativeDict, PathComponent};
use crate::types::ExecutionContext;
use crate::values::{flatten_path, ValueReader, ValueWriter};

/// Write the requested context entries into a fresh engine dictionary.
///
/// Every key in `keys` must be present in `context`. The token key must be
/// among them for a context that backs a listener registration.
pub fn pack<K: AsRef<str>>(
    context: &ExecutionContext,
    keys: &[K],
    writer: &ValueWriter,
) -> Result<NativeDict> {
    let mut dict = crate::native::MutableDict::new();
    for key in keys {
        let key = key.as_ref();
        let value = context
            .get(key)
            .ok_or_else(|| BridgeError::ContextMissingRequiredKey(key.to_string()))?;
        writer.write(dict.set(key), value)?;
    }
    Ok(dict.into_dict())
}

/// Rebuild a context from a packed dictionary.
///
/// Entries are decoded in flattening mode: a nested dictionary value comes
/// back as one entry per leaf, keyed by its path. Top-level keys holding a
/// leaf come back exactly as packed; only composite paths are escaped.
pub fn unpack(dict: &NativeDict, reader: &ValueReader) -> Result<ExecutionContext> {
    let mut context = ExecutionContext::new();
    let entries = reader.read_flattened_with(dict, |path| match path {
        [PathComponent::Key(key)] => key.clone(),
        _ => flatten_path(path),
    })?;
    for (key, value) in entries {
        context.insert(key, value);
    }
    Ok(context)
}
