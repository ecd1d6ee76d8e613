//! Value codecs
//!
//! A codec converts one Rust type to and from the bytes stored in Redis.
//! [`JsonCodec`] is what the typed accessors use by default; callers with
//! their own wire format implement [`Codec`] and go through `get_with` /
//! `set_with`.

use bytes::Bytes;
use errors::{DbkitError, DbkitResult};
use serde::{de::DeserializeOwned, Serialize};
use std::any::type_name;
use std::marker::PhantomData;

/// Serializer/deserializer bound to a single type
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> DbkitResult<Bytes>;

    fn decode(&self, bytes: &[u8]) -> DbkitResult<T>;
}

/// JSON codec via `serde_json`
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Copy for JsonCodec<T> {}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsonCodec<{}>", type_name::<T>())
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> DbkitResult<Bytes> {
        to_json(value)
    }

    fn decode(&self, bytes: &[u8]) -> DbkitResult<T> {
        from_json(bytes)
    }
}

/// Encode any serializable value, including unsized ones such as `str`
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> DbkitResult<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|source| DbkitError::Encode {
            type_name: type_name::<T>(),
            source,
        })
}

pub fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> DbkitResult<T> {
    serde_json::from_slice(bytes).map_err(|source| DbkitError::Decode {
        type_name: type_name::<T>(),
        source,
    })
}

/// Decode a stored value where JSON `null` means absent
pub fn from_json_opt<T: DeserializeOwned>(bytes: &[u8]) -> DbkitResult<Option<T>> {
    if std::str::from_utf8(bytes).map(str::trim) == Ok("null") {
        return Ok(None);
    }
    from_json(bytes).map(Some)
}

/// Pass-through codec for values stored as plain UTF-8 text
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl Codec<String> for Utf8Codec {
    fn encode(&self, value: &String) -> DbkitResult<Bytes> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn decode(&self, bytes: &[u8]) -> DbkitResult<String> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DbkitError::Decode {
                type_name: type_name::<String>(),
                source: serde::de::Error::custom("stored value is not valid UTF-8"),
            })
    }
}
