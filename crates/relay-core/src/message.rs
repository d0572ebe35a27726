//! Message model and its wire encoding.
//!
//! A [`Message`] is the unit of transport and of fan-out. Every field except
//! `data` passes through untouched; `data` is an opaque JSON payload.
//!
//! On the wire the payload travels as a JSON-encoded string inside a
//! [`WireRecord`], so transports never have to understand its shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CodecError;

/// A message moving through a channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Logical service the message belongs to.
    #[serde(default)]
    pub service_name: String,
    /// Originating client.
    #[serde(default)]
    pub client_id: String,
    /// Originating user.
    #[serde(default)]
    pub user_id: String,
    /// Request correlation ID.
    #[serde(default)]
    pub request_id: String,
    /// Producer timestamp (opaque string, usually epoch millis).
    #[serde(default)]
    pub stamp: String,
    /// Opaque payload.
    pub data: Value,
}

impl Message {
    /// Create a message carrying `data` with every other field empty.
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self {
            service_name: String::new(),
            client_id: String::new(),
            user_id: String::new(),
            request_id: String::new(),
            stamp: String::new(),
            data,
        }
    }

    /// Set the service name.
    #[must_use]
    pub fn with_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Set the producer stamp.
    #[must_use]
    pub fn with_stamp(mut self, stamp: impl Into<String>) -> Self {
        self.stamp = stamp.into();
        self
    }

    /// Encode into the wire representation.
    pub fn to_wire(&self) -> Result<WireRecord, CodecError> {
        Ok(WireRecord {
            client_id: self.client_id.clone(),
            request_id: self.request_id.clone(),
            service_name: self.service_name.clone(),
            user_id: self.user_id.clone(),
            stamp: self.stamp.clone(),
            data: serde_json::to_string(&self.data).map_err(CodecError::Encode)?,
        })
    }
}

/// Wire form of a [`Message`]: the payload is a JSON-encoded string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
    /// Originating client.
    #[serde(default)]
    pub client_id: String,
    /// Request correlation ID.
    #[serde(default)]
    pub request_id: String,
    /// Logical service the record belongs to.
    #[serde(default)]
    pub service_name: String,
    /// Originating user.
    #[serde(default)]
    pub user_id: String,
    /// Producer timestamp.
    #[serde(default)]
    pub stamp: String,
    /// JSON-encoded payload.
    pub data: String,
}

impl WireRecord {
    /// Decode back into a [`Message`], parsing the payload.
    pub fn into_message(self) -> Result<Message, CodecError> {
        let data = serde_json::from_str(&self.data).map_err(CodecError::Decode)?;
        Ok(Message {
            service_name: self.service_name,
            client_id: self.client_id,
            user_id: self.user_id,
            request_id: self.request_id,
            stamp: self.stamp,
            data,
        })
    }

    /// Serialize the record to a JSON text frame.
    pub fn to_frame(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(CodecError::Encode)
    }

    /// Parse a record from a JSON text frame.
    pub fn from_frame(frame: &str) -> Result<Self, CodecError> {
        serde_json::from_str(frame).map_err(CodecError::Decode)
    }
}
