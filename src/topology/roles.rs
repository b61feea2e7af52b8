//! Role Behaviors
//!
//! The four roles share one `TopologyService`; what differs is the join
//! protocol, what a view change triggers and which role-specific commands
//! are answered. Each variant carries the state its role needs.

use super::service::TopologyService;
use super::state::{DeploymentSink, DeploymentSource};
use super::types::{Role, UpdateOutcome, UpdateState};
use crate::dispatcher::protocol::{Command, Deployment, DeploymentReply, Envelope, Response};
use crate::error::{FederationError, Result};
use crate::membership::{MemberIdentity, RuntimeKind, ViewDiff, naming};

use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

pub struct AuthorityRole {
    deployments: Option<Arc<dyn DeploymentSource>>,
}

pub struct ZoneRole {
    sink: Arc<dyn DeploymentSink>,
    /// Held for the whole update protocol so at most one update runs.
    state: Mutex<UpdateState>,
    /// Set when a controller showed up while an update was running; a
    /// deferred update then runs again instead of giving up.
    retry: AtomicBool,
    /// Handed to zone peers asking the leader.
    cache: ArcSwapOption<Deployment>,
}

pub enum RoleBehavior {
    Controller(AuthorityRole),
    Domain(AuthorityRole),
    Zone(ZoneRole),
    Node,
}

impl RoleBehavior {
    pub fn controller(deployments: Arc<dyn DeploymentSource>) -> Self {
        RoleBehavior::Controller(AuthorityRole {
            deployments: Some(deployments),
        })
    }

    pub fn domain(deployments: Option<Arc<dyn DeploymentSource>>) -> Self {
        RoleBehavior::Domain(AuthorityRole { deployments })
    }

    /// `synchronize = false` starts out updated and never pulls a deployment.
    pub fn zone(sink: Arc<dyn DeploymentSink>, synchronize: bool) -> Self {
        let initial = if synchronize {
            UpdateState::NotUpdated
        } else {
            UpdateState::Updated
        };
        RoleBehavior::Zone(ZoneRole {
            sink,
            state: Mutex::new(initial),
            retry: AtomicBool::new(false),
            cache: ArcSwapOption::empty(),
        })
    }

    pub fn node() -> Self {
        RoleBehavior::Node
    }

    pub fn role(&self) -> Role {
        match self {
            RoleBehavior::Controller(_) => Role::Controller,
            RoleBehavior::Domain(_) => Role::Domain,
            RoleBehavior::Zone(_) => Role::Zone,
            RoleBehavior::Node => Role::Node,
        }
    }

    /// Runs after the channel is connected, the dispatcher started and the
    /// first view installed.
    pub(crate) async fn join(&self, service: &Arc<TopologyService>) -> Result<()> {
        match self {
            RoleBehavior::Controller(_) => {
                tracing::info!("Announcing controller {}", service.runtime_name());
                service
                    .dispatcher()
                    .broadcast_to_domain(Command::ControllerAvailable {
                        controller: service.runtime_name().to_string(),
                    })
                    .await
            }
            RoleBehavior::Domain(_) => Ok(()),
            RoleBehavior::Zone(zone) => match zone.update(service).await? {
                UpdateOutcome::Deferred => {
                    tracing::warn!(
                        "Zone {} not updated yet, waiting for a controller",
                        service.zone_name().unwrap_or_default()
                    );
                    Ok(())
                }
                _ => Ok(()),
            },
            RoleBehavior::Node => synchronize_node(service).await,
        }
    }

    /// Called from the view-delivery task after the registry is updated.
    pub(crate) fn view_changed(&self, service: &Arc<TopologyService>, diff: &ViewDiff) {
        match self {
            RoleBehavior::Controller(_) | RoleBehavior::Domain(_) => refresh_metadata(service, diff),
            RoleBehavior::Zone(zone) => {
                // Our own first view is handled by the join protocol.
                let me = service.local_address();
                if diff.joins.iter().any(|member| Some(&member.address) == me.as_ref()) {
                    return;
                }
                if let Some(controller) = diff
                    .joins
                    .iter()
                    .find(|member| member.kind() == RuntimeKind::Controller)
                {
                    zone.request_update(service, controller.runtime_name());
                }
            }
            RoleBehavior::Node => {}
        }
    }

    /// Commands whose answer depends on the role.
    pub(crate) async fn handle(
        &self,
        service: &Arc<TopologyService>,
        envelope: Envelope,
    ) -> Result<Response> {
        match (self, envelope.command) {
            (
                RoleBehavior::Controller(authority) | RoleBehavior::Domain(authority),
                Command::DeploymentRequest { zone },
            ) => {
                let reply = match authority
                    .deployments
                    .as_ref()
                    .and_then(|source| source.deployment_for(&zone))
                {
                    Some(deployment) => DeploymentReply::Deployment(deployment),
                    None => DeploymentReply::NotUpdated,
                };
                tracing::debug!("Deployment of zone {} requested by {}", zone, envelope.sender);
                Ok(Response::Deployment(reply))
            }
            (RoleBehavior::Zone(role), Command::DeploymentRequest { zone }) => {
                let reply = match role.cache.load_full() {
                    Some(deployment) if deployment.zone == zone => {
                        DeploymentReply::Deployment(Deployment::clone(&deployment))
                    }
                    _ => DeploymentReply::NotUpdated,
                };
                Ok(Response::Deployment(reply))
            }
            (RoleBehavior::Zone(role), Command::ControllerAvailable { controller }) => {
                role.request_update(service, &controller);
                Ok(Response::Ack)
            }
            (_, Command::ControllerAvailable { controller }) => {
                tracing::debug!("Controller {} available", controller);
                Ok(Response::Ack)
            }
            (_, Command::DeploymentRequest { .. }) => {
                Ok(Response::Deployment(DeploymentReply::NotUpdated))
            }
            (_, command) => Err(FederationError::IllegalOperation {
                role: self.role().as_str().to_string(),
                operation: command.name(),
            }),
        }
    }

    pub(crate) async fn update(&self, service: &Arc<TopologyService>) -> Result<UpdateOutcome> {
        match self {
            RoleBehavior::Zone(zone) => zone.update(service).await,
            _ => Err(FederationError::IllegalOperation {
                role: self.role().as_str().to_string(),
                operation: "update",
            }),
        }
    }

    pub(crate) async fn update_state(&self) -> Option<UpdateState> {
        match self {
            RoleBehavior::Zone(zone) => Some(*zone.state.lock().await),
            _ => None,
        }
    }

    /// Non-blocking variant for stats; `None` while an update is running.
    pub(crate) fn try_update_state(&self) -> Option<UpdateState> {
        match self {
            RoleBehavior::Zone(zone) => zone.state.try_lock().ok().map(|state| *state),
            _ => None,
        }
    }
}

impl ZoneRole {
    /// Reacts to a controller becoming available. An update already holding
    /// the lock sees the retry flag and runs again if it ends up deferred.
    fn request_update(&self, service: &Arc<TopologyService>, controller: &str) {
        self.retry.store(true, Ordering::SeqCst);
        let idle = match self.state.try_lock() {
            Ok(state) => *state == UpdateState::NotUpdated,
            Err(_) => return,
        };
        if !idle {
            return;
        }

        tracing::info!("Controller {} available, retrying zone update", controller);
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = service.update().await {
                tracing::warn!("Zone update after controller announcement failed: {}", e);
            }
        });
    }

    async fn update(&self, service: &Arc<TopologyService>) -> Result<UpdateOutcome> {
        loop {
            self.retry.store(false, Ordering::SeqCst);
            let outcome = self.attempt(service).await?;
            if outcome == UpdateOutcome::Deferred && self.retry.load(Ordering::SeqCst) {
                tracing::debug!("Controller appeared during the update, trying again");
                continue;
            }
            return Ok(outcome);
        }
    }

    /// Leader first, then the controller; without a controller, defer.
    async fn attempt(&self, service: &Arc<TopologyService>) -> Result<UpdateOutcome> {
        let mut state = self.state.lock().await;
        if *state == UpdateState::Updated {
            return Ok(UpdateOutcome::AlreadyUpdated);
        }

        let zone = service
            .zone_name()
            .ok_or_else(|| FederationError::Config("zone role without a zone".to_string()))?
            .to_string();
        let dispatcher = service.dispatcher();
        let view = dispatcher.view()?;
        let request = Command::DeploymentRequest { zone: zone.clone() };

        if let Some(leader) = naming::leader_of(&zone, &view)
            && Some(&leader) != service.local_address().as_ref()
            && let Some(leader_name) = naming::runtime_name_of(&leader)
        {
            match dispatcher
                .send_synchronous(&leader_name, request.clone(), service.config().timeout())
                .await
            {
                Ok(Response::Deployment(DeploymentReply::Deployment(deployment))) => {
                    tracing::info!("Zone {} deployment received from leader {}", zone, leader_name);
                    self.apply(deployment).await?;
                    *state = UpdateState::Updated;
                    return Ok(UpdateOutcome::Updated);
                }
                Ok(_) => {
                    tracing::info!("Zone leader {} not updated, asking the controller", leader_name)
                }
                Err(e) => tracing::warn!("Zone leader {} could not answer: {}", leader_name, e),
            }
        }

        match dispatcher
            .send_synchronous_to_controller(request, service.config().timeout())
            .await
        {
            Ok(Response::Deployment(DeploymentReply::Deployment(deployment))) => {
                tracing::info!("Zone {} deployment received from the controller", zone);
                self.apply(deployment).await?;
                *state = UpdateState::Updated;
                Ok(UpdateOutcome::Updated)
            }
            Ok(other) => {
                tracing::warn!("Controller had no deployment for zone {}: {:?}", zone, other);
                Ok(UpdateOutcome::Deferred)
            }
            Err(FederationError::ControllerNotFound) => {
                tracing::warn!("No controller in the domain, deferring update of zone {}", zone);
                Ok(UpdateOutcome::Deferred)
            }
            Err(e) if e.is_unreachable() => {
                tracing::warn!("Controller unreachable, deferring update of zone {}: {}", zone, e);
                Ok(UpdateOutcome::Deferred)
            }
            Err(e) => Err(e),
        }
    }

    async fn apply(&self, deployment: Deployment) -> Result<()> {
        self.sink
            .apply(deployment.clone())
            .await
            .map_err(|e| FederationError::Deployment(e.to_string()))?;
        self.cache.store(Some(Arc::new(deployment)));
        Ok(())
    }
}

/// The oldest member is the seed and has nothing to pull; everyone else
/// merges the oldest member's snapshot.
async fn synchronize_node(service: &Arc<TopologyService>) -> Result<()> {
    let view = service.dispatcher().view()?;
    let Some(oldest) = view.oldest().cloned() else {
        return Err(FederationError::NotConnected);
    };
    if Some(&oldest) == service.local_address().as_ref() {
        tracing::info!("Oldest member of the domain, skipping snapshot");
        return Ok(());
    }

    tracing::info!("Requesting domain snapshot from {}", oldest);
    let response = service
        .dispatcher()
        .send_first(
            &oldest,
            Command::DomainSnapshotRequest,
            service.config().snapshot_timeout(),
        )
        .await?;

    match response {
        Response::Snapshot(snapshot) => {
            let version = snapshot.version;
            let merged = service.state().merge(snapshot)?;
            tracing::info!("Merged {} entries of snapshot version {}", merged, version);
            Ok(())
        }
        other => Err(FederationError::Decode(format!(
            "expected a snapshot from {}, got {:?}",
            oldest, other
        ))),
    }
}

/// Pulls transport metadata from new zone leaders and new members off the
/// view-delivery task.
fn refresh_metadata(service: &Arc<TopologyService>, diff: &ViewDiff) {
    let me = service.local_address();
    let others = |member: &&MemberIdentity| Some(&member.address) != me.as_ref();

    for leader in diff.new_leaders.iter().filter(others) {
        spawn_refresh(service, leader, Command::ZoneMetadataUpdate);
    }
    for member in diff.joins.iter().filter(others) {
        spawn_refresh(service, member, Command::RuntimeMetadataUpdate);
    }
}

fn spawn_refresh(service: &Arc<TopologyService>, member: &MemberIdentity, command: Command) {
    let Some(zone) = member.zone().map(str::to_string) else {
        return;
    };
    let runtime = member.runtime_name().to_string();
    let service = service.clone();

    tokio::spawn(async move {
        let name = command.name();
        let timeout = service.config().timeout();
        match service.dispatcher().send_synchronous(&runtime, command, timeout).await {
            Ok(Response::ZoneMetadata(metadata)) => {
                if service.registry().update_zone_metadata(&zone, metadata) {
                    tracing::debug!("Zone {} metadata refreshed from {}", zone, runtime);
                }
            }
            Ok(Response::Metadata(metadata)) => {
                if service.registry().update_runtime_metadata(&zone, &runtime, metadata) {
                    tracing::debug!("Runtime {} metadata refreshed", runtime);
                }
            }
            Ok(other) => tracing::warn!("Unexpected {} reply from {}: {:?}", name, runtime, other),
            Err(e) => tracing::warn!("{} from {} failed: {}", name, runtime, e),
        }
    });
}
