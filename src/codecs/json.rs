//! JSON codecs using `serde_json`
//!
//! `JsonCodec` serialises values as UTF-8 JSON and never pools.
//! `JsonKeyCodec` gives keys the same rendering, so hash field names stay
//! stable and human-inspectable in the dashboard.

use crate::error::{MapError, Result};
use crate::pool::PooledValue;
use crate::traits::{KeyCodec, ValueCodec};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// JSON value codec using `serde_json`
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl<T> ValueCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn serialize(&self, value: &T) -> Result<PooledValue> {
        let bytes =
            serde_json::to_vec(value).map_err(|err| MapError::ValueDecode(err.to_string()))?;
        Ok(PooledValue::unpooled(bytes))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        if bytes.is_empty() {
            // JSON has no zero-byte rendering of any value.
            return Err(MapError::ValueRequired);
        }
        serde_json::from_slice(bytes).map_err(|err| MapError::ValueDecode(err.to_string()))
    }

    fn display(&self, value: &T) -> String {
        serde_json::to_string(value).unwrap_or_else(|_| "<unrenderable>".to_string())
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}

/// JSON key codec using `serde_json`
///
/// The default key codec of every map.
#[derive(Debug, Default, Clone)]
pub struct JsonKeyCodec;

impl<K> KeyCodec<K> for JsonKeyCodec
where
    K: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, key: &K) -> Result<String> {
        serde_json::to_string(key).map_err(|err| MapError::KeyDecode(err.to_string()))
    }

    fn decode(&self, field: &str) -> Result<K> {
        serde_json::from_str(field).map_err(|err| MapError::KeyDecode(err.to_string()))
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}
