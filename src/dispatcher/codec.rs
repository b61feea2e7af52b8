//! Message Codecs
//!
//! Turns [`WireMessage`]s into channel payloads and back. Malformed or foreign
//! payloads fail with [`FederationError::Decode`].

use super::protocol::WireMessage;
use crate::error::{FederationError, Result};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub trait MessageCodec: Send + Sync {
    fn name(&self) -> &'static str;

    fn serialize(&self, message: &WireMessage) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<WireMessage>;
}

/// Compact binary encoding, the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl MessageCodec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn serialize(&self, message: &WireMessage) -> Result<Vec<u8>> {
        bincode::serialize(message).map_err(|e| FederationError::Encode(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<WireMessage> {
        bincode::deserialize(bytes).map_err(|e| FederationError::Decode(e.to_string()))
    }
}

/// Human-readable encoding, handy when sniffing traffic.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, message: &WireMessage) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| FederationError::Encode(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<WireMessage> {
        serde_json::from_slice(bytes).map_err(|e| FederationError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Bincode,
    Json,
}

impl CodecKind {
    pub fn build(self) -> Arc<dyn MessageCodec> {
        match self {
            CodecKind::Bincode => Arc::new(BincodeCodec),
            CodecKind::Json => Arc::new(JsonCodec),
        }
    }
}
