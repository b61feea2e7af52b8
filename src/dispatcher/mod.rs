//! Request Dispatcher Module
//!
//! Command messaging between runtimes of one domain, layered over a
//! [`GroupChannel`](crate::transport::GroupChannel).
//!
//! ## Delivery modes
//! - **Asynchronous**: fire-and-forget to one runtime, a zone (member by member),
//!   the controller, or the whole domain.
//! - **Synchronous**: request/response bounded by a timeout, to one runtime, the
//!   controller, or every member of a zone with optional fail-fast.
//!
//! ## Submodules
//! - **`protocol`**: commands, envelopes and responses on the wire.
//! - **`codec`**: the `MessageCodec` seam with bincode and JSON implementations.
//! - **`handlers`**: named application handlers invoked by `Execute` commands.
//! - **`service`**: the `RequestDispatcher` itself.

pub mod codec;
pub mod handlers;
pub mod protocol;
pub mod service;

pub use codec::{BincodeCodec, CodecKind, JsonCodec, MessageCodec};
pub use handlers::{CommandHandlerRegistry, Invocation};
pub use protocol::{Command, Envelope, Response, WireMessage};
pub use service::RequestDispatcher;

#[cfg(test)]
mod tests;
