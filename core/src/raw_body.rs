//! Recognises bodies that serialize as a byte buffer.
//!
//! `bytes::Bytes` (and anything else built on `serialize_bytes`) is sent
//! verbatim under form and non-JSON content types. Sequences of integers are
//! not bytes, however small the integers are.

use bytes::Bytes;
use serde::ser::{self, Impossible, Serialize, Serializer};

/// The payload of `value` when it serializes as a byte buffer.
pub(crate) fn raw_bytes<B: Serialize + ?Sized>(value: &B) -> Option<Bytes> {
    value.serialize(RawBytes).ok()
}

#[derive(Debug)]
pub(crate) struct NotBytes;

impl std::fmt::Display for NotBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("value is not a byte buffer")
    }
}

impl std::error::Error for NotBytes {}

impl ser::Error for NotBytes {
    fn custom<T: std::fmt::Display>(_msg: T) -> Self {
        NotBytes
    }
}

struct RawBytes;

macro_rules! reject {
    ($($method:ident($($arg:ty),*)),* $(,)?) => {
        $(
            fn $method(self, $(_: $arg),*) -> Result<Self::Ok, Self::Error> {
                Err(NotBytes)
            }
        )*
    };
}

impl Serializer for RawBytes {
    type Ok = Bytes;
    type Error = NotBytes;
    type SerializeSeq = Impossible<Bytes, NotBytes>;
    type SerializeTuple = Impossible<Bytes, NotBytes>;
    type SerializeTupleStruct = Impossible<Bytes, NotBytes>;
    type SerializeTupleVariant = Impossible<Bytes, NotBytes>;
    type SerializeMap = Impossible<Bytes, NotBytes>;
    type SerializeStruct = Impossible<Bytes, NotBytes>;
    type SerializeStructVariant = Impossible<Bytes, NotBytes>;

    fn serialize_bytes(self, v: &[u8]) -> Result<Bytes, NotBytes> {
        Ok(Bytes::copy_from_slice(v))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Bytes, NotBytes> {
        value.serialize(self)
    }

    reject!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_f32(f32),
        serialize_f64(f64),
        serialize_char(char),
        serialize_str(&str),
        serialize_none(),
        serialize_unit(),
        serialize_unit_struct(&'static str),
        serialize_unit_variant(&'static str, u32, &'static str),
    );

    fn serialize_some<T: Serialize + ?Sized>(self, _value: &T) -> Result<Bytes, NotBytes> {
        Err(NotBytes)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Bytes, NotBytes> {
        Err(NotBytes)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, NotBytes> {
        Err(NotBytes)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, NotBytes> {
        Err(NotBytes)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, NotBytes> {
        Err(NotBytes)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, NotBytes> {
        Err(NotBytes)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, NotBytes> {
        Err(NotBytes)
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, NotBytes> {
        Err(NotBytes)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, NotBytes> {
        Err(NotBytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_recognised() {
        let body = Bytes::from_static(b"\x00\xffraw");
        assert_eq!(raw_bytes(&body), Some(body.clone()));
    }

    #[test]
    fn integer_lists_are_not_bytes() {
        assert_eq!(raw_bytes(&vec![1u32, 2, 3]), None);
        assert_eq!(raw_bytes(&b"k=v".to_vec()), None);
        assert_eq!(raw_bytes("text"), None);
    }
}
