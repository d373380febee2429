use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Corps d'un message : texte ou binaire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MessageBody {
    Text(String),
    Bytes(Vec<u8>),
}

impl MessageBody {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MessageBody::Text(text) => text.as_bytes(),
            MessageBody::Bytes(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Message stocké dans une file du broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub destination: String,
    pub body: MessageBody,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// Horodatage d'envoi (ms depuis epoch)
    pub timestamp_ms: i64,
}

impl Message {
    pub fn new<S: Into<String>>(destination: S, body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            destination: destination.into(),
            body,
            properties: HashMap::new(),
            timestamp_ms: now_millis(),
        }
    }

    pub fn text<S: Into<String>, T: Into<String>>(destination: S, text: T) -> Self {
        Self::new(destination, MessageBody::Text(text.into()))
    }

    pub fn bytes<S: Into<String>, V: Into<Vec<u8>>>(destination: S, bytes: V) -> Self {
        Self::new(destination, MessageBody::Bytes(bytes.into()))
    }

    pub fn with_property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
