//! Wire Protocol Definitions
//!
//! Commands and responses exchanged between runtimes over the domain channel.
//! Every request payload is an [`Envelope`] and every reply a [`Response`],
//! both wrapped in a [`WireMessage`] before hitting the codec.

use crate::error::{FederationError, Unreachable};
use crate::registry::Metadata;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Asks a zone leader for the zone's transport metadata.
    ZoneMetadataUpdate,
    /// Asks a runtime for its own transport metadata.
    RuntimeMetadataUpdate,
    /// A controller joined the domain; deferred zone updates may proceed.
    ControllerAvailable { controller: String },
    /// Asks for the deployment of `zone`, answered from a leader's cache or
    /// by the controller.
    DeploymentRequest { zone: String },
    /// Asks for the current domain state.
    DomainSnapshotRequest,
    /// Runs a registered application handler.
    Execute { handler: String, payload: Vec<u8> },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ZoneMetadataUpdate => "zone-metadata-update",
            Command::RuntimeMetadataUpdate => "runtime-metadata-update",
            Command::ControllerAvailable { .. } => "controller-available",
            Command::DeploymentRequest { .. } => "deployment-request",
            Command::DomainSnapshotRequest => "domain-snapshot-request",
            Command::Execute { .. } => "execute",
        }
    }
}

/// A command plus the runtime name of its sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: String,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub zone: String,
    pub revision: u64,
    pub contributions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentReply {
    /// The asked runtime has nothing to hand out yet.
    NotUpdated,
    Deployment(Deployment),
}

/// Point-in-time copy of the domain state. Values are JSON documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSnapshot {
    pub version: u64,
    pub entries: BTreeMap<String, String>,
}

/// Failure reported by the receiver itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub runtime: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Timeout,
    Suspected,
    Remote,
    Local,
}

/// Failure observed by the caller while talking to `runtime`, recorded in
/// place of that runtime's response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSystemError {
    pub runtime: String,
    pub kind: FailureKind,
    pub message: String,
}

impl RemoteSystemError {
    pub fn from_error(runtime: &str, error: &FederationError) -> Self {
        let kind = match error {
            FederationError::UnreachablePeer {
                cause: Unreachable::Timeout(_),
                ..
            } => FailureKind::Timeout,
            FederationError::UnreachablePeer {
                cause: Unreachable::Suspected,
                ..
            } => FailureKind::Suspected,
            FederationError::RemoteError { .. } => FailureKind::Remote,
            _ => FailureKind::Local,
        };
        Self {
            runtime: runtime.to_string(),
            kind,
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ack,
    Metadata(Metadata),
    ZoneMetadata(Metadata),
    Deployment(DeploymentReply),
    Snapshot(DomainSnapshot),
    Payload(Vec<u8>),
    Error(ErrorResponse),
    RemoteSystem(RemoteSystemError),
}

impl Response {
    pub fn is_failure(&self) -> bool {
        matches!(self, Response::Error(_) | Response::RemoteSystem(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    Command(Envelope),
    Response(Response),
}
