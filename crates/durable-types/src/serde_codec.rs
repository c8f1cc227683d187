use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ErrorKind, ExecutionError};
use crate::payload::{Codec, Payload};

/// Pluggable value <-> bytes serializer.
///
/// Implementations must round-trip every payload type the user declares.
/// The optional exception hooks let a `SerDes` reconstruct the original
/// exception type on replay; a `SerDes` that doesn't support this simply
/// returns `Ok(None)` and callers fall back to a generic wrapper.
pub trait SerDes: Send + Sync {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Payload, ExecutionError>;
    fn deserialize<T: DeserializeOwned>(&self, payload: &Payload) -> Result<T, ExecutionError>;

    /// Serialize an already-constructed [`crate::error::ErrorObject`]'s
    /// `data` field for cross-invocation reconstruction of the original
    /// exception. Returns `Ok(None)` when the `SerDes` has no type-tagged
    /// representation to offer.
    fn serialize_exception<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Option<Payload>, ExecutionError> {
        Ok(Some(self.serialize(value)?))
    }

    fn deserialize_exception<T: DeserializeOwned>(
        &self,
        payload: &Payload,
    ) -> Result<Option<T>, ExecutionError> {
        Ok(Some(self.deserialize(payload)?))
    }
}

/// Default JSON `SerDes`, backed by `serde_json`. Ships as the working
/// default every caller gets without configuring anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerDes;

impl SerDes for JsonSerDes {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Payload, ExecutionError> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            ExecutionError::new(ErrorKind::SerDes, "failed to serialize payload").with_detail(e.to_string())
        })?;
        Ok(Payload::new(bytes, Codec::Json))
    }

    fn deserialize<T: DeserializeOwned>(&self, payload: &Payload) -> Result<T, ExecutionError> {
        match payload.codec {
            Codec::Json => serde_json::from_slice(&payload.bytes).map_err(|e| {
                ExecutionError::new(ErrorKind::SerDes, "failed to deserialize payload")
                    .with_detail(e.to_string())
            }),
        }
    }
}
