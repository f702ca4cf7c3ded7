use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::module::{Module, Operation};
use crate::Result;

/// A value that can be pushed to clients.
///
/// `KIND` is the payload-type discriminator written next to the encoded data,
/// so receivers pick the decoder from the tag instead of guessing the shape.
pub trait PushPayload: Serialize {
    const KIND: &'static str;
}

/// A list of payloads travels under the element's discriminator.
impl<T: PushPayload> PushPayload for Vec<T> {
    const KIND: &'static str = T::KIND;
}

/// Payload already encoded to JSON, together with its discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedPayload {
    pub kind: String,
    pub body: String,
}

impl EncodedPayload {
    /// Encode a typed payload
    pub fn encode<T: PushPayload + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self {
            kind: T::KIND.to_string(),
            body: serde_json::to_string(value)?,
        })
    }

    /// Wrap a payload that was encoded elsewhere (e.g. received from the broker)
    #[must_use]
    pub fn raw(kind: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            body: body.into(),
        }
    }

    /// Decode the body as `T`, or `None` when the discriminator names another type
    pub fn decode<T: PushPayload + DeserializeOwned>(&self) -> Result<Option<T>> {
        if self.kind != T::KIND {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&self.body)?))
    }
}

/// Message written to a client connection.
///
/// The CONNECTED acknowledgement carries neither `payload-type` nor `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub module: Module,
    pub operation: Operation,
    #[serde(
        rename = "payload-type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub payload_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Envelope {
    #[must_use]
    pub fn new(module: Module, operation: Operation, payload: &EncodedPayload) -> Self {
        Self {
            module,
            operation,
            payload_type: Some(payload.kind.clone()),
            data: Some(payload.body.clone()),
        }
    }

    /// Acknowledgement sent to a connection right after it registers
    #[must_use]
    pub fn connected(module: Module) -> Self {
        Self {
            module,
            operation: Operation::connected(),
            payload_type: None,
            data: None,
        }
    }

    #[must_use]
    pub fn payload(&self) -> Option<EncodedPayload> {
        match (&self.payload_type, &self.data) {
            (Some(kind), Some(body)) => Some(EncodedPayload::raw(kind.clone(), body.clone())),
            _ => None,
        }
    }

    pub fn decode<T: PushPayload + DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.payload() {
            Some(payload) => payload.decode(),
            None => Ok(None),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
