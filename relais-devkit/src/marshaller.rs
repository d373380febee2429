/*!
Marshallers : payload typé <-> octets

Le harness ne connaît le format qu'à travers ce trait ; `JsonMarshaller`
couvre le cas courant de tout type serde.
*/

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    #[error("Failed to marshal {payload_type}: {reason}")]
    Marshal { payload_type: &'static str, reason: String },
    #[error("Failed to unmarshal {payload_type}: {reason}")]
    Unmarshal { payload_type: &'static str, reason: String },
}

/// Sérialisation/désérialisation d'un type de payload
pub trait Marshaller<T>: Send + Sync {
    fn marshal(&self, payload: &T) -> Result<Vec<u8>, MarshalError>;

    fn unmarshal(&self, bytes: &[u8]) -> Result<T, MarshalError>;

    fn content_type(&self) -> &'static str {
        "application/octet-stream"
    }
}

/// Marshaller JSON pour tout type serde
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

impl<T> Marshaller<T> for JsonMarshaller
where
    T: Serialize + DeserializeOwned,
{
    fn marshal(&self, payload: &T) -> Result<Vec<u8>, MarshalError> {
        serde_json::to_vec(payload).map_err(|e| MarshalError::Marshal {
            payload_type: std::any::type_name::<T>(),
            reason: e.to_string(),
        })
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<T, MarshalError> {
        serde_json::from_slice(bytes).map_err(|e| MarshalError::Unmarshal {
            payload_type: std::any::type_name::<T>(),
            reason: e.to_string(),
        })
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}
