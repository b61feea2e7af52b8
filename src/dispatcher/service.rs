use super::codec::MessageCodec;
use super::protocol::{Command, Envelope, RemoteSystemError, Response, WireMessage};
use crate::error::{FederationError, Result};
use crate::membership::{Address, View, naming};
use crate::transport::{GroupChannel, RequestOptions};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Sends commands to runtimes, zones, the controller or the whole domain
/// over one group channel.
///
/// Targets are resolved against the channel's current view at call time.
/// Every synchronous call is bounded by its timeout.
pub struct RequestDispatcher {
    channel: Arc<dyn GroupChannel>,
    codec: Arc<dyn MessageCodec>,
    runtime_name: String,
    running: AtomicBool,
}

impl RequestDispatcher {
    pub fn new(
        channel: Arc<dyn GroupChannel>,
        codec: Arc<dyn MessageCodec>,
        runtime_name: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            codec,
            runtime_name: runtime_name.into(),
            running: AtomicBool::new(false),
        })
    }

    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            tracing::info!("Request dispatcher started for {}", self.runtime_name);
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Request dispatcher stopped for {}", self.runtime_name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn runtime_name(&self) -> &str {
        &self.runtime_name
    }

    pub fn codec(&self) -> &Arc<dyn MessageCodec> {
        &self.codec
    }

    /// The view operations resolve against; fails while stopped or before
    /// the channel installed its first view.
    pub fn view(&self) -> Result<View> {
        if !self.is_running() {
            return Err(FederationError::NotConnected);
        }
        self.channel.current_view().ok_or(FederationError::NotConnected)
    }

    fn encode(&self, command: Command) -> Result<Vec<u8>> {
        self.codec.serialize(&WireMessage::Command(Envelope {
            sender: self.runtime_name.clone(),
            command,
        }))
    }

    /// Sends `command` to each member of `zone` individually. A member that
    /// cannot be reached is logged and skipped.
    pub async fn broadcast_to_zone(&self, zone: &str, command: Command) -> Result<()> {
        let view = self.view()?;
        let name = command.name();
        let payload = self.encode(command)?;
        let members = naming::members_of(zone, &view);
        tracing::debug!("Broadcasting {} to {} member(s) of zone {}", name, members.len(), zone);

        for address in members {
            if let Err(e) = self.channel.send(Some(&address), payload.clone()).await {
                tracing::warn!("Failed to send {} to {}: {}", name, address, e);
            }
        }
        Ok(())
    }

    /// One send addressed to every current member, the sender included.
    pub async fn broadcast_to_domain(&self, command: Command) -> Result<()> {
        self.view()?;
        tracing::debug!("Broadcasting {} to the domain", command.name());
        let payload = self.encode(command)?;
        self.channel.send(None, payload).await
    }

    pub async fn send_asynchronous(&self, runtime_name: &str, command: Command) -> Result<()> {
        let view = self.view()?;
        let address = naming::resolve(runtime_name, &view)
            .ok_or_else(|| FederationError::RuntimeNotFound(runtime_name.to_string()))?;
        let payload = self.encode(command)?;
        self.channel
            .send(Some(&address), payload)
            .await
            .map_err(|e| relabel(e, runtime_name))
    }

    pub async fn send_asynchronous_to_controller(&self, command: Command) -> Result<()> {
        let view = self.view()?;
        let address = naming::controller_of(&view).ok_or(FederationError::ControllerNotFound)?;
        let runtime = runtime_label(&address);
        let payload = self.encode(command)?;
        self.channel
            .send(Some(&address), payload)
            .await
            .map_err(|e| relabel(e, &runtime))
    }

    /// Single-target request. An unknown runtime fails before anything is
    /// sent; no answer within `timeout` is a timeout-kind `UnreachablePeer`.
    pub async fn send_synchronous(
        &self,
        runtime_name: &str,
        command: Command,
        timeout: Duration,
    ) -> Result<Response> {
        let view = self.view()?;
        let address = naming::resolve(runtime_name, &view)
            .ok_or_else(|| FederationError::RuntimeNotFound(runtime_name.to_string()))?;
        let payload = self.encode(command)?;
        self.call(&address, runtime_name, payload, RequestOptions::get_all(timeout))
            .await
    }

    pub async fn send_synchronous_to_controller(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<Response> {
        let view = self.view()?;
        let address = naming::controller_of(&view).ok_or(FederationError::ControllerNotFound)?;
        let runtime = runtime_label(&address);
        let payload = self.encode(command)?;
        self.call(&address, &runtime, payload, RequestOptions::get_all(timeout))
            .await
    }

    /// Asks a specific member, first responder wins.
    pub async fn send_first(
        &self,
        address: &Address,
        command: Command,
        timeout: Duration,
    ) -> Result<Response> {
        self.view()?;
        let runtime = runtime_label(address);
        let payload = self.encode(command)?;
        self.call(address, &runtime, payload, RequestOptions::get_first(timeout))
            .await
    }

    /// Requests `command` from every member of `zone`, one after another in
    /// view order.
    ///
    /// Each member yields exactly one entry: its response, or a
    /// [`Response::RemoteSystem`] standing in for a timeout, suspicion or
    /// remote error. With `fail_fast`, the first failure ends the iteration
    /// and only the entries collected so far are returned.
    pub async fn send_synchronous_to_zone(
        &self,
        zone: &str,
        command: Command,
        fail_fast: bool,
        timeout: Duration,
    ) -> Result<Vec<Response>> {
        let view = self.view()?;
        let members = naming::members_of(zone, &view);
        let name = command.name();
        let payload = self.encode(command)?;
        let mut responses = Vec::with_capacity(members.len());

        for address in members {
            let runtime = runtime_label(&address);
            match self
                .call(&address, &runtime, payload.clone(), RequestOptions::get_all(timeout))
                .await
            {
                Ok(response) => responses.push(response),
                Err(e) => {
                    tracing::warn!("{} to {} in zone {} failed: {}", name, runtime, zone, e);
                    responses.push(Response::RemoteSystem(RemoteSystemError::from_error(
                        &runtime, &e,
                    )));
                    if fail_fast {
                        tracing::debug!("Fail-fast: skipping remaining members of {}", zone);
                        break;
                    }
                }
            }
        }

        Ok(responses)
    }

    async fn call(
        &self,
        address: &Address,
        runtime: &str,
        payload: Vec<u8>,
        options: RequestOptions,
    ) -> Result<Response> {
        let reply = self
            .channel
            .request(address, payload, options)
            .await
            .map_err(|e| relabel(e, runtime))?;

        match self.codec.deserialize(&reply)? {
            WireMessage::Response(Response::Error(error)) => Err(FederationError::RemoteError {
                runtime: error.runtime,
                message: error.message,
            }),
            WireMessage::Response(response) => Ok(response),
            WireMessage::Command(envelope) => Err(FederationError::Decode(format!(
                "expected a response from {}, got command {}",
                runtime,
                envelope.command.name()
            ))),
        }
    }
}

/// Runtime name of a member, falling back to its raw logical name.
fn runtime_label(address: &Address) -> String {
    naming::runtime_name_of(address).unwrap_or_else(|| address.name.clone())
}

/// Transport errors name the logical address; callers think in runtime names.
fn relabel(error: FederationError, runtime: &str) -> FederationError {
    match error {
        FederationError::UnreachablePeer { cause, .. } => FederationError::UnreachablePeer {
            target: runtime.to_string(),
            cause,
        },
        FederationError::RemoteError { message, .. } => FederationError::RemoteError {
            runtime: runtime.to_string(),
            message,
        },
        other => other,
    }
}
