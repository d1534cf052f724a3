//! Host data to [`Value`] through `serde::Serialize`.
//!
//! Shapes without a faithful [`Value`] encoding (tuples, fixed-size arrays,
//! tuple structs, enum variants carrying data, maps with non-string keys)
//! are rejected with [`BridgeError::UnsupportedValueShape`].

use crate::error::{BridgeError, Result};
use crate::types::Value;
use serde::ser::{self, Impossible, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

impl ser::Error for BridgeError {
    fn custom<T: Display>(msg: T) -> Self {
        BridgeError::Serialization(msg.to_string())
    }
}

/// Convert any serializable host value.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    value.serialize(ValueSerializer)
}

fn unsupported(shape: impl Into<String>) -> BridgeError {
    BridgeError::UnsupportedValueShape(shape.into())
}

/// Serializer producing a [`Value`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ValueSerializer;

impl ser::Serializer for ValueSerializer {
    type Ok = Value;
    type Error = BridgeError;

    type SerializeSeq = SeqSerializer;
    type SerializeTuple = Impossible<Value, BridgeError>;
    type SerializeTupleStruct = Impossible<Value, BridgeError>;
    type SerializeTupleVariant = Impossible<Value, BridgeError>;
    type SerializeMap = MapSerializer;
    type SerializeStruct = MapSerializer;
    type SerializeStructVariant = Impossible<Value, BridgeError>;

    fn serialize_bool(self, v: bool) -> Result<Value> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_i16(self, v: i16) -> Result<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_i32(self, v: i32) -> Result<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_i64(self, v: i64) -> Result<Value> {
        Ok(Value::Int(v))
    }

    fn serialize_i128(self, v: i128) -> Result<Value> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| unsupported("i128 outside the 64-bit range"))
    }

    fn serialize_u8(self, v: u8) -> Result<Value> {
        Ok(Value::UInt(v.into()))
    }

    fn serialize_u16(self, v: u16) -> Result<Value> {
        Ok(Value::UInt(v.into()))
    }

    fn serialize_u32(self, v: u32) -> Result<Value> {
        Ok(Value::UInt(v.into()))
    }

    fn serialize_u64(self, v: u64) -> Result<Value> {
        Ok(Value::UInt(v))
    }

    fn serialize_u128(self, v: u128) -> Result<Value> {
        u64::try_from(v)
            .map(Value::UInt)
            .map_err(|_| unsupported("u128 outside the 64-bit range"))
    }

    fn serialize_f32(self, v: f32) -> Result<Value> {
        Ok(Value::Float32(v))
    }

    fn serialize_f64(self, v: f64) -> Result<Value> {
        Ok(Value::Float64(v))
    }

    fn serialize_char(self, v: char) -> Result<Value> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Value> {
        Ok(Value::String(v.to_owned()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value> {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn serialize_none(self) -> Result<Value> {
        Ok(Value::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Value> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Value> {
        Ok(Value::String(variant.to_owned()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Value> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        _value: &T,
    ) -> Result<Value> {
        Err(unsupported(format!("enum variant {}::{}", name, variant)))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqSerializer> {
        Ok(SeqSerializer {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple> {
        Err(unsupported(format!("tuple or fixed-size array of {}", len)))
    }

    fn serialize_tuple_struct(
        self,
        name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Err(unsupported(format!("tuple struct {}", name)))
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(unsupported(format!("enum variant {}::{}", name, variant)))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapSerializer> {
        Ok(MapSerializer::default())
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<MapSerializer> {
        Ok(MapSerializer::default())
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(unsupported(format!("enum variant {}::{}", name, variant)))
    }
}

pub struct SeqSerializer {
    items: Vec<Value>,
}

impl ser::SerializeSeq for SeqSerializer {
    type Ok = Value;
    type Error = BridgeError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.items.push(to_value(value)?);
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(Value::Array(self.items))
    }
}

#[derive(Default)]
pub struct MapSerializer {
    entries: BTreeMap<String, Value>,
    next_key: Option<String>,
}

impl ser::SerializeMap for MapSerializer {
    type Ok = Value;
    type Error = BridgeError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<()> {
        match to_value(key)? {
            Value::String(key) => {
                self.next_key = Some(key);
                Ok(())
            }
            other => Err(unsupported(format!("map key of type {}", other.type_name()))),
        }
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| BridgeError::Serialization("map value without a key".into()))?;
        self.entries.insert(key, to_value(value)?);
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(Value::Dict(self.entries))
    }
}

impl ser::SerializeStruct for MapSerializer {
    type Ok = Value;
    type Error = BridgeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.entries.insert(key.to_owned(), to_value(value)?);
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(Value::Dict(self.entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct Character {
        name: String,
        age: u32,
        height: f32,
        tags: Vec<String>,
        master: Option<String>,
    }

    #[derive(Serialize)]
    enum Side {
        Light,
        Grey(u8),
    }

    #[test]
    fn test_struct_to_dict() {
        let yoda = Character {
            name: "Yoda".into(),
            age: 900,
            height: 0.66,
            tags: vec!["jedi".into()],
            master: None,
        };
        let value = to_value(&yoda).unwrap();
        let dict = value.as_dict().unwrap();

        assert_eq!(dict["name"], Value::String("Yoda".into()));
        assert_eq!(dict["age"], Value::UInt(900));
        assert_eq!(dict["height"], Value::Float32(0.66));
        assert_eq!(dict["tags"], Value::Array(vec![Value::String("jedi".into())]));
        assert_eq!(dict["master"], Value::Null);
    }

    #[test]
    fn test_signed_integers_stay_signed() {
        assert_eq!(to_value(&900i64).unwrap(), Value::Int(900));
        assert_eq!(to_value(&-3i8).unwrap(), Value::Int(-3));
        assert_eq!(to_value(&(i64::MAX as i128)).unwrap(), Value::Int(i64::MAX));
        assert!(to_value(&(i128::MAX)).is_err());
    }

    #[test]
    fn test_unsupported_shapes() {
        let shapes = [
            to_value(&(1, 2)),
            to_value(&[1u8, 2, 3]),
            to_value(&Side::Grey(1)),
        ];
        for result in shapes {
            assert!(matches!(result, Err(BridgeError::UnsupportedValueShape(_))));
        }

        let mut keyed = HashMap::new();
        keyed.insert(1u32, "one");
        assert!(matches!(
            to_value(&keyed),
            Err(BridgeError::UnsupportedValueShape(_))
        ));
    }

    #[test]
    fn test_unit_variant_to_string() {
        assert_eq!(to_value(&Side::Light).unwrap(), Value::String("Light".into()));
    }

    #[test]
    fn test_string_keyed_map() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), vec![1i32, 2]);
        let value = to_value(&map).unwrap();
        assert_eq!(
            value.as_dict().unwrap()["a"],
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
    }
}
