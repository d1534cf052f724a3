//! Conversion between engine values and host [`Value`]s.
//!
//! [`ValueReader`] decodes in two modes: nested (document properties,
//! container elements, query rows, callback documents) and flattened
//! (context unpacking and [`crate::Session::flattened_properties`]).
//! [`ValueWriter`] encodes into engine containers; [`to_value`] and the JSON
//! conversions build `Value`s from host data.

mod host;
mod json;
mod reader;
mod writer;

pub use host::{to_value, MapSerializer, SeqSerializer, ValueSerializer};
pub use reader::{flatten_path, ReadMode, ValueReader};
pub use writer::ValueWriter;

/// Default nesting limit for reads and writes.
pub const DEFAULT_MAX_DEPTH: usize = 64;
