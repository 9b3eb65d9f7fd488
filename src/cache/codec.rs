//! Value codecs.
//!
//! A [`Codec`] is the serialize/deserialize contract between a typed
//! [`Cache`](super::Cache) and the byte-level tiers. A decode failure is how
//! corruption is detected at the boundary.

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CacheError, Result};

pub trait Codec<T>: Send + Sync + 'static {
    fn encode(&self, value: &T) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON via serde.
#[derive(Debug)]
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
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

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|e| CacheError::InvalidRequest(format!("value not serializable: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| CacheError::CorruptEntry(format!("JSON decode failed: {e}")))
    }
}

/// Pass-through for raw payloads such as image metadata blobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Listing {
        id: u64,
        title: String,
    }

    #[test]
    fn test_json_codec() {
        let codec = JsonCodec::<Listing>::new();
        let listing = Listing {
            id: 9,
            title: "Bike".to_string(),
        };
        let bytes = codec.encode(&listing).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), listing);
    }

    #[test]
    fn test_json_codec_rejects_wrong_shape() {
        let codec = JsonCodec::<Listing>::new();
        let result = codec.decode(br#"{"id":"nine"}"#);
        assert!(matches!(result, Err(CacheError::CorruptEntry(_))));
    }

    #[test]
    fn test_bytes_codec() {
        let bytes = BytesCodec.encode(&vec![0, 159, 146, 150]).unwrap();
        assert_eq!(BytesCodec.decode(&bytes).unwrap(), vec![0, 159, 146, 150]);
    }
}
