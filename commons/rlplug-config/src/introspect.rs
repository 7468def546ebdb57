use std::fmt;

use serde::{
    Deserialize, Deserializer,
    de::{self, Visitor},
    forward_to_deserialize_any,
};

use crate::error::AdaptError;

/// Returns the field names `T` accepts, as declared by its `Deserialize`
/// implementation.
///
/// Only types that deserialize as a plain struct declare their fields; maps,
/// enums and flattened structs are rejected as not introspectable.
pub fn declared_fields<T>() -> Result<&'static [&'static str], AdaptError>
where
    T: for<'de> Deserialize<'de>,
{
    let mut fields = None;
    let _ = T::deserialize(FieldProbe {
        fields: &mut fields,
    });
    fields.ok_or(AdaptError::NotIntrospectable(std::any::type_name::<T>()))
}

/// Deserializer that records the field list of `deserialize_struct` and
/// then aborts.
struct FieldProbe<'a> {
    fields: &'a mut Option<&'static [&'static str]>,
}

#[derive(Debug)]
struct ProbeAbort;

impl fmt::Display for ProbeAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("field probe aborted")
    }
}

impl std::error::Error for ProbeAbort {}

impl de::Error for ProbeAbort {
    fn custom<T: fmt::Display>(_msg: T) -> Self {
        ProbeAbort
    }
}

impl<'de> Deserializer<'de> for FieldProbe<'_> {
    type Error = ProbeAbort;

    fn deserialize_any<V: Visitor<'de>>(
        self,
        _visitor: V,
    ) -> Result<V::Value, Self::Error> {
        Err(ProbeAbort)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, Self::Error> {
        *self.fields = Some(fields);
        Err(ProbeAbort)
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier ignored_any
    }
}
