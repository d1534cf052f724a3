//! Core host-side types for the bridge.

use crate::blobs::Blob;
use crate::native::{NativeError, NativeReplicatorStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved context key holding the listener token.
pub const TOKEN_KEY: &str = "uuid";

/// Reserved context key holding the owning session's id.
pub const SESSION_KEY: &str = "session";

/// Any value the engine can produce or accept.
///
/// Numbers keep the engine's classification so a save/reload cycle never
/// changes a field's numeric subtype.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    BlobRef(Blob),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(f) => Some(*f),
            Value::Float32(f) => Some(*f as f64),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Value::BlobRef(blob) => Some(blob),
            _ => None,
        }
    }

    /// Short name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Dict(_) => "dict",
            Value::BlobRef(_) => "blob",
        }
    }
}

macro_rules! value_from {
    ($variant:ident as $target:ty: $($source:ty),*) => {
        $(
            impl From<$source> for Value {
                fn from(v: $source) -> Self {
                    Value::$variant(v as $target)
                }
            }
        )*
    };
}

value_from!(Int as i64: i8, i16, i32, i64);
value_from!(UInt as u64: u8, u16, u32, u64);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Dict(v)
    }
}

impl From<Blob> for Value {
    fn from(v: Blob) -> Self {
        Value::BlobRef(v)
    }
}

/// Ambient key/value data carried across the boundary with a listener.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionContext {
    entries: Vec<(String, Value)>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Use a caller-chosen listener token instead of a generated one.
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.with(TOKEN_KEY, Value::String(token.into()))
    }

    /// Insert or replace a value, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The listener token, if present and a string.
    pub fn token(&self) -> Option<&str> {
        self.get(TOKEN_KEY).and_then(Value::as_str)
    }

    /// The owning session's id, if present.
    pub fn session_id(&self) -> Option<u64> {
        self.get(SESSION_KEY).and_then(Value::as_u64)
    }
}

/// The kinds of listener the engine can call back into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerKind {
    DatabaseChange,
    DocumentChange,
    QueryChange,
    NotificationReady,
    PushFilter,
    PullFilter,
    ReplicatorChange,
    ReplicatedDocument,
    ConflictResolver,
}

impl ListenerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerKind::DatabaseChange => "database_change",
            ListenerKind::DocumentChange => "document_change",
            ListenerKind::QueryChange => "query_change",
            ListenerKind::NotificationReady => "notification_ready",
            ListenerKind::PushFilter => "push_filter",
            ListenerKind::PullFilter => "pull_filter",
            ListenerKind::ReplicatorChange => "replicator_change",
            ListenerKind::ReplicatedDocument => "replicated_document",
            ListenerKind::ConflictResolver => "conflict_resolver",
        }
    }
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle for one live listener registration.
///
/// Not `Clone`: removing a listener consumes its token.
#[derive(Debug, PartialEq, Eq)]
pub struct ListenerToken {
    pub(crate) token: String,
    pub(crate) kind: ListenerKind,
    pub(crate) native_id: u64,
}

impl ListenerToken {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Id of the engine-side listener handle.
    pub fn native_id(&self) -> u64 {
        self.native_id
    }
}

/// A document revision read from the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub sequence: u64,
    pub properties: BTreeMap<String, Value>,
}

impl Document {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// How a conflict resolver wants a conflict settled.
#[derive(Clone, Debug, PartialEq)]
pub enum ConflictResolution {
    /// Keep the local revision.
    Local,
    /// Take the remote revision.
    Remote,
    /// Save a new revision with these properties.
    Merged(BTreeMap<String, Value>),
    /// Delete the document.
    Delete,
}

/// Replicator lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Stopped,
    Offline,
    Connecting,
    Idle,
    Busy,
}

impl ActivityLevel {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ActivityLevel::Stopped,
            1 => ActivityLevel::Offline,
            2 => ActivityLevel::Connecting,
            3 => ActivityLevel::Idle,
            _ => ActivityLevel::Busy,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicatorProgress {
    /// Very approximate completion, from 0.0 to 1.0.
    pub fraction_complete: f32,
    pub document_count: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicatorStatus {
    pub activity: ActivityLevel,
    pub progress: ReplicatorProgress,
    pub error: Option<NativeError>,
}

impl From<&NativeReplicatorStatus> for ReplicatorStatus {
    fn from(status: &NativeReplicatorStatus) -> Self {
        Self {
            activity: ActivityLevel::from_raw(status.activity),
            progress: ReplicatorProgress {
                fraction_complete: status.progress.fraction_complete,
                document_count: status.progress.document_count,
            },
            error: (!status.error.is_ok()).then_some(status.error),
        }
    }
}

/// Flags describing a replicated document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFlags(pub u32);

impl DocumentFlags {
    pub const DELETED: DocumentFlags = DocumentFlags(1 << 0);
    pub const ACCESS_REMOVED: DocumentFlags = DocumentFlags(1 << 1);

    pub fn contains(self, other: DocumentFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// A document that was pushed or pulled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedDocument {
    pub id: String,
    pub flags: DocumentFlags,
    /// Set when the document failed to replicate.
    pub error: Option<NativeError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_insert_replaces_in_place() {
        let mut ctx = ExecutionContext::new().with("a", 1i64).with("b", "x");
        ctx.insert("a", 2i64);

        let keys: Vec<_> = ctx.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(ctx.get("a"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_context_token() {
        let ctx = ExecutionContext::new().with_token("T1");
        assert_eq!(ctx.token(), Some("T1"));

        let ctx = ExecutionContext::new().with(TOKEN_KEY, 5i64);
        assert_eq!(ctx.token(), None);
    }

    #[test]
    fn test_value_from_preserves_subtype() {
        assert_eq!(Value::from(900i32), Value::Int(900));
        assert_eq!(Value::from(900u16), Value::UInt(900));
        assert_eq!(Value::from(1.5f32), Value::Float32(1.5));
    }

    #[test]
    fn test_status_conversion() {
        let native = NativeReplicatorStatus {
            activity: 4,
            ..Default::default()
        };
        let status = ReplicatorStatus::from(&native);
        assert_eq!(status.activity, ActivityLevel::Busy);
        assert!(status.error.is_none());
    }

    #[test]
    fn test_document_flags() {
        let flags = DocumentFlags(3);
        assert!(flags.contains(DocumentFlags::DELETED));
        assert!(flags.contains(DocumentFlags::ACCESS_REMOVED));
        assert!(!DocumentFlags::default().contains(DocumentFlags::DELETED));
    }
}
