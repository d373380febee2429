/*!
Conversion message <-> payload typé via un marshaller

Chaque message produit porte le nom du type de payload (`payload_type`) et
le content-type du marshaller ; un message marqué avec un autre type est refusé
à la lecture.
*/

use crate::marshaller::{MarshalError, Marshaller};
use relais_broker::{Message, MessageBody};
use std::marker::PhantomData;

pub const PAYLOAD_TYPE_PROPERTY: &str = "payload_type";
pub const CONTENT_TYPE_PROPERTY: &str = "content_type";

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error("Message carries payload type {found}, expected {expected}")]
    PayloadTypeMismatch { expected: &'static str, found: String },
    #[error("Text body requested but marshalled payload is not UTF-8")]
    NotUtf8,
}

/// Type de corps produit par le converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyKind {
    #[default]
    Bytes,
    Text,
}

pub trait MessageConverter<T>: Send + Sync {
    fn to_message(&self, destination: &str, payload: &T) -> Result<Message, ConversionError>;

    fn from_message(&self, message: &Message) -> Result<T, ConversionError>;
}

pub struct MarshallingMessageConverter<T, M> {
    marshaller: M,
    body_kind: BodyKind,
    _payload: PhantomData<fn() -> T>,
}

impl<T, M> MarshallingMessageConverter<T, M>
where
    M: Marshaller<T>,
{
    pub fn new(marshaller: M) -> Self {
        Self {
            marshaller,
            body_kind: BodyKind::Bytes,
            _payload: PhantomData,
        }
    }

    pub fn with_body_kind(mut self, body_kind: BodyKind) -> Self {
        self.body_kind = body_kind;
        self
    }

    pub fn payload_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl<T, M> MessageConverter<T> for MarshallingMessageConverter<T, M>
where
    M: Marshaller<T>,
{
    fn to_message(&self, destination: &str, payload: &T) -> Result<Message, ConversionError> {
        let bytes = self.marshaller.marshal(payload)?;
        let body = match self.body_kind {
            BodyKind::Bytes => MessageBody::Bytes(bytes),
            BodyKind::Text => MessageBody::Text(String::from_utf8(bytes).map_err(|_| ConversionError::NotUtf8)?),
        };

        Ok(Message::new(destination, body)
            .with_property(PAYLOAD_TYPE_PROPERTY, self.payload_type())
            .with_property(CONTENT_TYPE_PROPERTY, self.marshaller.content_type()))
    }

    fn from_message(&self, message: &Message) -> Result<T, ConversionError> {
        // messages sans marquage (envoyés à la main) : on tente quand même
        if let Some(found) = message.property(PAYLOAD_TYPE_PROPERTY) {
            if found != self.payload_type() {
                return Err(ConversionError::PayloadTypeMismatch {
                    expected: self.payload_type(),
                    found: found.to_string(),
                });
            }
        }
        Ok(self.marshaller.unmarshal(message.body.as_bytes())?)
    }
}
