//! Engine-side dynamic values.
//!
//! Immutable containers are reference-counted views; mutable builders are
//! consumed when attached to a parent slot, so a freshly built container is
//! always owned by exactly one parent.

use crate::blobs::NativeBlob;
use std::collections::BTreeMap;
use std::ffi::c_void;
use std::sync::Arc;

/// Property marking a dictionary as a blob reference.
pub const BLOB_TYPE_PROPERTY: &str = "@type";
/// Value of [`BLOB_TYPE_PROPERTY`] for blob references.
pub const BLOB_TYPE: &str = "blob";
/// Content digest property of a blob reference.
pub const BLOB_DIGEST_PROPERTY: &str = "digest";
/// Length property of a blob reference.
pub const BLOB_LENGTH_PROPERTY: &str = "length";
/// MIME type property of a blob reference.
pub const BLOB_CONTENT_TYPE_PROPERTY: &str = "content_type";

/// Type tags reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ValueType {
    Undefined = -1,
    Null = 0,
    Boolean = 1,
    Number = 2,
    String = 3,
    Data = 4,
    Array = 5,
    Dict = 6,
}

impl ValueType {
    /// Map a raw engine tag to a known type.
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            -1 => Some(ValueType::Undefined),
            0 => Some(ValueType::Null),
            1 => Some(ValueType::Boolean),
            2 => Some(ValueType::Number),
            3 => Some(ValueType::String),
            4 => Some(ValueType::Data),
            5 => Some(ValueType::Array),
            6 => Some(ValueType::Dict),
            _ => None,
        }
    }
}

/// A self-describing value as stored by the engine.
#[derive(Clone, Debug, Default)]
pub enum NativeValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    String(Arc<str>),
    Data(Arc<[u8]>),
    Array(NativeArray),
    Dict(NativeDict),
    /// A value whose engine type this layer does not model.
    Opaque { tag: i32 },
}

impl NativeValue {
    /// Raw engine type tag.
    pub fn type_tag(&self) -> i32 {
        match self {
            NativeValue::Undefined => ValueType::Undefined as i32,
            NativeValue::Null => ValueType::Null as i32,
            NativeValue::Bool(_) => ValueType::Boolean as i32,
            NativeValue::Int(_)
            | NativeValue::UInt(_)
            | NativeValue::Float(_)
            | NativeValue::Double(_) => ValueType::Number as i32,
            NativeValue::String(_) => ValueType::String as i32,
            NativeValue::Data(_) => ValueType::Data as i32,
            NativeValue::Array(_) => ValueType::Array as i32,
            NativeValue::Dict(_) => ValueType::Dict as i32,
            NativeValue::Opaque { tag } => *tag,
        }
    }

    /// True if the number is stored as a signed integer.
    pub fn is_integer(&self) -> bool {
        matches!(self, NativeValue::Int(_))
    }

    /// True if the number is stored as an unsigned integer.
    pub fn is_unsigned(&self) -> bool {
        matches!(self, NativeValue::UInt(_))
    }

    /// True if the number is stored as a double-precision float.
    pub fn is_double(&self) -> bool {
        matches!(self, NativeValue::Double(_))
    }

    pub fn as_bool(&self) -> bool {
        match self {
            NativeValue::Bool(b) => *b,
            NativeValue::Int(i) => *i != 0,
            NativeValue::UInt(u) => *u != 0,
            _ => false,
        }
    }

    pub fn as_int(&self) -> i64 {
        match self {
            NativeValue::Int(i) => *i,
            NativeValue::UInt(u) => *u as i64,
            NativeValue::Float(f) => *f as i64,
            NativeValue::Double(d) => *d as i64,
            NativeValue::Bool(b) => *b as i64,
            _ => 0,
        }
    }

    pub fn as_unsigned(&self) -> u64 {
        match self {
            NativeValue::UInt(u) => *u,
            NativeValue::Int(i) => *i as u64,
            NativeValue::Float(f) => *f as u64,
            NativeValue::Double(d) => *d as u64,
            NativeValue::Bool(b) => *b as u64,
            _ => 0,
        }
    }

    pub fn as_double(&self) -> f64 {
        match self {
            NativeValue::Double(d) => *d,
            NativeValue::Float(f) => *f as f64,
            NativeValue::Int(i) => *i as f64,
            NativeValue::UInt(u) => *u as f64,
            _ => 0.0,
        }
    }

    pub fn as_float(&self) -> f32 {
        match self {
            NativeValue::Float(f) => *f,
            NativeValue::Double(d) => *d as f32,
            NativeValue::Int(i) => *i as f32,
            NativeValue::UInt(u) => *u as f32,
            _ => 0.0,
        }
    }

    /// String contents; the length is carried with the slice, so embedded
    /// NUL bytes are preserved.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            NativeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            NativeValue::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NativeArray> {
        match self {
            NativeValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&NativeDict> {
        match self {
            NativeValue::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// Immutable, reference-counted array.
#[derive(Clone, Debug, Default)]
pub struct NativeArray(Arc<Vec<NativeValue>>);

impl NativeArray {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NativeValue> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NativeValue> {
        self.0.iter()
    }

    /// Number of live references to this array.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

type DictMap = BTreeMap<String, NativeValue>;

/// Immutable, reference-counted dictionary with keys in engine order.
#[derive(Clone, Debug, Default)]
pub struct NativeDict(Arc<DictMap>);

impl NativeDict {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&NativeValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, String, NativeValue> {
        self.0.iter()
    }

    /// True if this dictionary carries the `"@type": "blob"` marker.
    pub fn is_blob(&self) -> bool {
        matches!(
            self.get(BLOB_TYPE_PROPERTY).and_then(NativeValue::as_string),
            Some(BLOB_TYPE)
        )
    }

    /// Number of live references to this dictionary.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn ptr_eq(&self, other: &NativeDict) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Borrowed pointer to pass through a `void *` callback argument.
    ///
    /// The pointer is valid for as long as some reference to this
    /// dictionary is alive.
    pub fn as_raw(&self) -> *mut c_void {
        Arc::as_ptr(&self.0) as *mut c_void
    }

    /// Take a new reference to a dictionary from a pointer produced by
    /// [`NativeDict::as_raw`].
    ///
    /// # Safety
    /// `ptr` must be null or come from `as_raw` on a dictionary that is
    /// still alive for the duration of this call.
    pub unsafe fn retain_raw(ptr: *const c_void) -> Option<NativeDict> {
        if ptr.is_null() {
            return None;
        }
        let ptr = ptr as *const DictMap;
        Arc::increment_strong_count(ptr);
        Some(NativeDict(Arc::from_raw(ptr)))
    }
}

/// Builder for a [`NativeArray`].
#[derive(Debug, Default)]
pub struct MutableArray {
    items: Vec<NativeValue>,
}

impl MutableArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Append an empty element and return its slot.
    pub fn append(&mut self) -> Slot<'_> {
        let index = self.items.len();
        self.items.push(NativeValue::Undefined);
        Slot {
            target: &mut self.items[index],
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Finish building. The builder is consumed.
    pub fn into_array(self) -> NativeArray {
        NativeArray(Arc::new(self.items))
    }
}

/// Builder for a [`NativeDict`].
#[derive(Debug, Default)]
pub struct MutableDict {
    entries: DictMap,
}

impl MutableDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or reset the entry for `key` and return its slot.
    pub fn set(&mut self, key: &str) -> Slot<'_> {
        let target = self.entries.entry(key.to_owned()).or_default();
        *target = NativeValue::Undefined;
        Slot { target }
    }

    pub fn get(&self, key: &str) -> Option<&NativeValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<NativeValue> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finish building. The builder is consumed.
    pub fn into_dict(self) -> NativeDict {
        NativeDict(Arc::new(self.entries))
    }
}

/// A writable location inside a mutable container. Each slot is written once.
#[derive(Debug)]
pub struct Slot<'a> {
    target: &'a mut NativeValue,
}

impl Slot<'_> {
    pub fn set_null(self) {
        *self.target = NativeValue::Null;
    }

    pub fn set_bool(self, value: bool) {
        *self.target = NativeValue::Bool(value);
    }

    pub fn set_int(self, value: i64) {
        *self.target = NativeValue::Int(value);
    }

    pub fn set_uint(self, value: u64) {
        *self.target = NativeValue::UInt(value);
    }

    pub fn set_float(self, value: f32) {
        *self.target = NativeValue::Float(value);
    }

    pub fn set_double(self, value: f64) {
        *self.target = NativeValue::Double(value);
    }

    pub fn set_string(self, value: &str) {
        *self.target = NativeValue::String(Arc::from(value));
    }

    pub fn set_data(self, value: &[u8]) {
        *self.target = NativeValue::Data(Arc::from(value));
    }

    /// Attach an array; ownership moves into the parent.
    pub fn set_array(self, value: NativeArray) {
        *self.target = NativeValue::Array(value);
    }

    /// Attach a dictionary; ownership moves into the parent.
    pub fn set_dict(self, value: NativeDict) {
        *self.target = NativeValue::Dict(value);
    }

    /// Store a blob reference (its metadata dictionary).
    pub fn set_blob(self, blob: &NativeBlob) {
        *self.target = NativeValue::Dict(blob.properties().clone());
    }

    pub fn set_value(self, value: NativeValue) {
        *self.target = value;
    }
}
