//! Domain Channel Glue
//!
//! [`DomainReceiver`] is the handler installed on the domain channel. View
//! changes become a diff that updates the registry, notifies listeners and
//! lets the role react, in that order. Commands are decoded and answered;
//! a failure to decode or handle one is logged and reported back to the
//! caller as an error response.

use super::service::TopologyService;
use crate::dispatcher::protocol::{ErrorResponse, Response, WireMessage};
use crate::error::{FederationError, Result};
use crate::membership::{Address, View, diff, naming};
use crate::transport::ChannelHandler;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::sync::{Arc, Weak};

pub struct DomainReceiver {
    service: Weak<TopologyService>,
    previous: ArcSwapOption<View>,
}

impl DomainReceiver {
    pub(crate) fn new(service: Weak<TopologyService>) -> Self {
        Self {
            service,
            previous: ArcSwapOption::empty(),
        }
    }

    /// Forgets the last processed view; the next one counts as the first.
    pub(crate) fn reset(&self) {
        self.previous.store(None);
    }
}

#[async_trait]
impl ChannelHandler for DomainReceiver {
    fn view_accepted(&self, view: View) {
        let Some(service) = self.service.upgrade() else {
            return;
        };
        let previous = self.previous.swap(Some(Arc::new(view.clone())));
        let diff = diff::compute(previous.as_deref(), &view);

        tracing::info!(
            "View {} installed on {}: {} member(s)",
            view.id,
            service.runtime_name(),
            view.len()
        );
        for member in &diff.leaves {
            tracing::info!("Runtime {} left the domain", member.address);
        }
        for member in &diff.joins {
            tracing::info!("Runtime {} joined the domain", member.address);
        }
        for leader in &diff.new_leaders {
            tracing::info!(
                "Runtime {} elected leader of zone {}",
                leader.runtime_name(),
                leader.zone().unwrap_or_default()
            );
        }

        service.registry().apply(&diff);
        service.listeners().dispatch(&diff);
        service.role_behavior().view_changed(&service, &diff);
        service.view_installed(view);
    }

    fn suspect(&self, address: &Address) {
        tracing::warn!("Runtime {} suspected", address);
    }

    async fn receive(&self, from: Address, payload: Vec<u8>) {
        let Some(service) = self.service.upgrade() else {
            return;
        };
        if service.local_address().as_ref() == Some(&from) {
            tracing::debug!("Discarding own message");
            return;
        }

        match service.dispatcher().codec().deserialize(&payload) {
            Ok(WireMessage::Command(envelope)) => {
                // One-way: the response has nowhere to go, failures are logged by the handler.
                service.handle_command(envelope).await;
            }
            Ok(WireMessage::Response(_)) => {
                tracing::warn!("Ignoring unsolicited response from {}", from);
            }
            Err(e) => tracing::error!("Dropping undecodable message from {}: {}", from, e),
        }
    }

    async fn handle_request(&self, from: Address, payload: Vec<u8>) -> Result<Vec<u8>> {
        let service = self.service.upgrade().ok_or(FederationError::NotConnected)?;
        let codec = service.dispatcher().codec().clone();

        let response = match codec.deserialize(&payload) {
            Ok(WireMessage::Command(envelope)) => service.handle_command(envelope).await,
            Ok(WireMessage::Response(_)) => {
                tracing::error!("Request from {} carried a response", from);
                error_response(&service, "expected a command".to_string())
            }
            Err(e) => {
                tracing::error!(
                    "Undecodable request from {}: {}",
                    naming::runtime_name_of(&from).unwrap_or_else(|| from.name.clone()),
                    e
                );
                error_response(&service, e.to_string())
            }
        };

        codec.serialize(&WireMessage::Response(response))
    }
}

pub(crate) fn error_response(service: &TopologyService, message: String) -> Response {
    Response::Error(ErrorResponse {
        runtime: service.runtime_name().to_string(),
        message,
    })
}
