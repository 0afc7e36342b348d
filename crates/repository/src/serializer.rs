//! Codecs for opaque payloads stored by the storage port

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),
}

/// Byte codec bound to a store before it is initialized.
///
/// Works over `serde_json::Value` so implementations stay object-safe; use
/// [`encode_value`] and [`decode_value`] for typed payloads.
pub trait Serializer: Send + Sync {
    /// Identifier this codec is registered under
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializeError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializeError>;
}

/// Encode any serializable value through `serializer`
pub fn encode_value<T: Serialize>(
    serializer: &dyn Serializer,
    value: &T,
) -> Result<Vec<u8>, SerializeError> {
    let value = serde_json::to_value(value).map_err(|e| SerializeError::Encode(e.to_string()))?;
    serializer.encode(&value)
}

/// Decode bytes produced by [`encode_value`] back into `T`
pub fn decode_value<T: DeserializeOwned>(
    serializer: &dyn Serializer,
    bytes: &[u8],
) -> Result<T, SerializeError> {
    let value = serializer.decode(bytes)?;
    serde_json::from_value(value).map_err(|e| SerializeError::Decode(e.to_string()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializeError> {
        serde_json::to_vec(value).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializeError> {
        serde_json::from_slice(bytes).map_err(|e| SerializeError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct YamlSerializer;

impl Serializer for YamlSerializer {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializeError> {
        serde_yaml::to_string(value)
            .map(String::into_bytes)
            .map_err(|e| SerializeError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializeError> {
        serde_yaml::from_slice(bytes).map_err(|e| SerializeError::Decode(e.to_string()))
    }
}
