use std::fmt;

use bytes::Bytes;

/// Errors raised while converting payloads to and from bytes.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    /// Body is not valid UTF-8.
    #[error("invalid utf-8 body: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Body is not valid JSON, or the value cannot be encoded.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Converts application values to packet bodies and back.
///
/// The same serializer must be used on both ends of a connection. Servers
/// use [`serialize_error`](Serializer::serialize_error) to turn a failed
/// handler into a response body.
pub trait Serializer: Send + Sync + fmt::Debug + 'static {
    /// Application-level value carried in a packet body.
    type Value: Send + Sync + 'static;

    fn serialize(&self, value: &Self::Value) -> Result<Bytes, SerializeError>;

    fn unserialize(&self, body: Bytes) -> Result<Self::Value, SerializeError>;

    /// Encode a handler failure as a response body.
    fn serialize_error(&self, message: &str) -> Result<Bytes, SerializeError>;
}

/// Bodies are UTF-8 strings; errors travel as their message.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl Serializer for StringSerializer {
    type Value = String;

    fn serialize(&self, value: &String) -> Result<Bytes, SerializeError> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn unserialize(&self, body: Bytes) -> Result<String, SerializeError> {
        Ok(String::from_utf8(body.to_vec())?)
    }

    fn serialize_error(&self, message: &str) -> Result<Bytes, SerializeError> {
        Ok(Bytes::copy_from_slice(message.as_bytes()))
    }
}

/// Bodies are JSON documents; errors travel as `{"error": "<message>"}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    type Value = serde_json::Value;

    fn serialize(&self, value: &serde_json::Value) -> Result<Bytes, SerializeError> {
        Ok(serde_json::to_vec(value)?.into())
    }

    fn unserialize(&self, body: Bytes) -> Result<serde_json::Value, SerializeError> {
        Ok(serde_json::from_slice(&body)?)
    }

    fn serialize_error(&self, message: &str) -> Result<Bytes, SerializeError> {
        self.serialize(&serde_json::json!({ "error": message }))
    }
}
