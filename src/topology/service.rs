use super::channels::{ChannelManager, ChannelReceiver};
use super::receiver::{DomainReceiver, error_response};
use super::roles::RoleBehavior;
use super::state::DomainState;
use super::types::{Role, TopologyStats, UpdateOutcome, UpdateState, ZoneSummary};
use crate::config::FederationConfig;
use crate::dispatcher::handlers::{CommandHandlerRegistry, Invocation};
use crate::dispatcher::protocol::{Command, Envelope, Response};
use crate::dispatcher::RequestDispatcher;
use crate::error::{FederationError, Result};
use crate::membership::{Address, RuntimeIdentity, View, naming};
use crate::registry::{ListenerId, ListenerMultiplexer, RuntimeRegistry, TopologyListener, ZoneMap};
use crate::transport::{ChannelConfig, ChannelFactory, GroupChannel};

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;

/// A runtime's membership in the domain.
///
/// Lifecycle: [`join_domain`](Self::join_domain) connects the domain
/// channel, starts the dispatcher, waits for the first view and runs the
/// role's join protocol. [`shutdown`](Self::shutdown) stops the dispatcher,
/// disconnects and closes every dynamic channel.
pub struct TopologyService {
    config: FederationConfig,
    identity: RuntimeIdentity,
    role: RoleBehavior,
    channel: Arc<dyn GroupChannel>,
    dispatcher: Arc<RequestDispatcher>,
    registry: Arc<RuntimeRegistry>,
    listeners: Arc<ListenerMultiplexer>,
    handlers: Arc<CommandHandlerRegistry>,
    state: Arc<DomainState>,
    channels: ChannelManager,
    receiver: Arc<DomainReceiver>,
    views: watch::Sender<Option<View>>,
    me: Weak<TopologyService>,
}

impl TopologyService {
    /// `channel` must not be connected yet; it gets connected with this
    /// runtime's encoded name by whoever created it.
    pub fn new(
        config: FederationConfig,
        channel: Arc<dyn GroupChannel>,
        factory: Arc<dyn ChannelFactory>,
        role: RoleBehavior,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        if config.role != role.role() {
            return Err(FederationError::Config(format!(
                "configured role {} does not match behavior {}",
                config.role.as_str(),
                role.role().as_str()
            )));
        }
        let identity = config.identity()?;
        let logical_name = naming::encode(&identity)?;

        let dispatcher = RequestDispatcher::new(
            channel.clone(),
            config.codec.build(),
            identity.runtime_name.clone(),
        );
        let channels = ChannelManager::new(
            factory,
            config.default_channel_config.clone(),
            logical_name,
        );
        let (views, _) = watch::channel(None);

        Ok(Arc::new_cyclic(|me: &Weak<Self>| Self {
            config,
            identity,
            role,
            channel,
            dispatcher,
            registry: RuntimeRegistry::new(),
            listeners: ListenerMultiplexer::new(),
            handlers: CommandHandlerRegistry::new(),
            state: DomainState::new(),
            channels,
            receiver: Arc::new(DomainReceiver::new(me.clone())),
            views,
            me: me.clone(),
        }))
    }

    /// The logical name the domain channel has to connect with.
    pub fn logical_name(&self) -> Result<String> {
        naming::encode(&self.identity)
    }

    // ===== LIFECYCLE =====

    pub async fn join_domain(&self) -> Result<()> {
        let this = self.me.upgrade().ok_or(FederationError::NotConnected)?;
        tracing::info!(
            "Runtime {} joining domain {} as {}",
            self.identity.runtime_name,
            self.config.domain_name,
            self.role().as_str()
        );

        self.channel.set_handler(self.receiver.clone());
        self.channel.connect(&self.config.domain_name).await?;
        self.dispatcher.start();

        self.wait_for_view(self.config.join_timeout()).await?;
        self.role.join(&this).await?;

        tracing::info!("Runtime {} joined domain {}", self.identity.runtime_name, self.config.domain_name);
        Ok(())
    }

    /// Bounded wait until the domain channel delivered a view.
    async fn wait_for_view(&self, timeout: Duration) -> Result<()> {
        let mut views = self.views.subscribe();
        match tokio::time::timeout(timeout, views.wait_for(Option::is_some)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(FederationError::NotConnected),
            Err(_) => {
                tracing::error!("No view received within {:?}", timeout);
                Err(FederationError::JoinTimeout(timeout))
            }
        }
    }

    pub async fn shutdown(&self) {
        tracing::info!("Runtime {} leaving domain {}", self.identity.runtime_name, self.config.domain_name);
        self.dispatcher.stop();
        self.channel.disconnect().await;
        self.channels.close_all().await;
        self.registry.clear();
        self.receiver.reset();
        self.views.send_replace(None);
    }

    pub(crate) fn view_installed(&self, view: View) {
        self.views.send_replace(Some(view));
    }

    // ===== ACCESSORS =====

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn identity(&self) -> &RuntimeIdentity {
        &self.identity
    }

    pub fn runtime_name(&self) -> &str {
        &self.identity.runtime_name
    }

    pub fn zone_name(&self) -> Option<&str> {
        self.identity.zone.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role.role()
    }

    pub(crate) fn role_behavior(&self) -> &RoleBehavior {
        &self.role
    }

    pub fn dispatcher(&self) -> &Arc<RequestDispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<RuntimeRegistry> {
        &self.registry
    }

    pub(crate) fn listeners(&self) -> &Arc<ListenerMultiplexer> {
        &self.listeners
    }

    pub fn handlers(&self) -> &Arc<CommandHandlerRegistry> {
        &self.handlers
    }

    pub fn state(&self) -> &Arc<DomainState> {
        &self.state
    }

    pub fn local_address(&self) -> Option<Address> {
        self.channel.local_address()
    }

    pub fn current_view(&self) -> Option<View> {
        self.channel.current_view()
    }

    // ===== TOPOLOGY QUERIES =====

    pub fn is_zone_leader(&self) -> bool {
        let (Some(zone), Some(view), Some(me)) =
            (self.zone_name(), self.current_view(), self.local_address())
        else {
            return false;
        };
        naming::leader_of(zone, &view).as_ref() == Some(&me)
    }

    pub fn is_controller_available(&self) -> bool {
        self.current_view()
            .is_some_and(|view| naming::controller_of(&view).is_some())
    }

    pub fn zone_leader_name(&self, zone: &str) -> Option<String> {
        let view = self.current_view()?;
        naming::leader_of(zone, &view).and_then(|leader| naming::runtime_name_of(&leader))
    }

    pub fn zones(&self) -> Vec<String> {
        self.registry.zones()
    }

    /// Runtime names of every decodable member, in view order.
    pub fn runtime_names(&self) -> Vec<String> {
        self.current_view()
            .map(|view| {
                naming::members(&view)
                    .into_iter()
                    .map(|member| member.identity.runtime_name)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn runtimes(&self) -> Arc<ZoneMap> {
        self.registry.snapshot()
    }

    pub fn topology(&self) -> Vec<ZoneSummary> {
        let runtimes = self.runtimes();
        runtimes
            .iter()
            .map(|(zone, members)| ZoneSummary {
                name: zone.clone(),
                leader: self.zone_leader_name(zone),
                runtimes: members.keys().cloned().collect(),
                metadata: self.registry.zone_metadata(zone),
            })
            .collect()
    }

    pub fn stats(&self) -> TopologyStats {
        let view = self.current_view();
        TopologyStats {
            runtime_name: self.identity.runtime_name.clone(),
            role: self.role(),
            zone: self.identity.zone.clone(),
            view_id: view.as_ref().map(|view| view.id),
            view_size: view.as_ref().map(View::len).unwrap_or(0),
            zones: self.registry.zones().len(),
            runtimes: self.registry.runtime_count(),
            controller_available: self.is_controller_available(),
            update_state: self.role.try_update_state(),
            dynamic_channels: self.channels.channel_names(),
            channel: self.channel.stats(),
        }
    }

    pub fn register_listener(&self, listener: Arc<dyn TopologyListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn deregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.deregister(id)
    }

    // ===== MESSAGING =====

    pub async fn broadcast_to_zone(&self, zone: &str, command: Command) -> Result<()> {
        self.dispatcher.broadcast_to_zone(zone, command).await
    }

    pub async fn broadcast_to_domain(&self, command: Command) -> Result<()> {
        self.dispatcher.broadcast_to_domain(command).await
    }

    pub async fn send_asynchronous(&self, runtime_name: &str, command: Command) -> Result<()> {
        self.dispatcher.send_asynchronous(runtime_name, command).await
    }

    /// `timeout` defaults to the configured bound.
    pub async fn send_synchronous(
        &self,
        runtime_name: &str,
        command: Command,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let timeout = timeout.unwrap_or_else(|| self.config.timeout());
        self.dispatcher.send_synchronous(runtime_name, command, timeout).await
    }

    pub async fn send_synchronous_to_zone(
        &self,
        zone: &str,
        command: Command,
        fail_fast: bool,
        timeout: Option<Duration>,
    ) -> Result<Vec<Response>> {
        let timeout = timeout.unwrap_or_else(|| self.config.timeout());
        self.dispatcher
            .send_synchronous_to_zone(zone, command, fail_fast, timeout)
            .await
    }

    pub async fn send_synchronous_to_controller(
        &self,
        command: Command,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        self.ensure_not_authority("send_synchronous_to_controller")?;
        let timeout = timeout.unwrap_or_else(|| self.config.timeout());
        self.dispatcher
            .send_synchronous_to_controller(command, timeout)
            .await
    }

    pub async fn send_asynchronous_to_controller(&self, command: Command) -> Result<()> {
        self.ensure_not_authority("send_asynchronous_to_controller")?;
        self.dispatcher.send_asynchronous_to_controller(command).await
    }

    fn ensure_not_authority(&self, operation: &'static str) -> Result<()> {
        if self.role().is_authority() {
            return Err(FederationError::IllegalOperation {
                role: self.role().as_str().to_string(),
                operation,
            });
        }
        Ok(())
    }

    // ===== ZONE UPDATE =====

    /// Runs the zone update protocol; zone role only.
    pub async fn update(&self) -> Result<UpdateOutcome> {
        let this = self.me.upgrade().ok_or(FederationError::NotConnected)?;
        self.role.update(&this).await
    }

    pub async fn update_state(&self) -> Option<UpdateState> {
        self.role.update_state().await
    }

    // ===== DYNAMIC CHANNELS =====

    pub async fn open_channel(
        &self,
        name: &str,
        config: Option<&ChannelConfig>,
        receiver: Arc<dyn ChannelReceiver>,
    ) -> Result<()> {
        self.channels.open_channel(name, config, receiver).await
    }

    pub async fn close_channel(&self, name: &str) -> Result<()> {
        self.channels.close_channel(name).await
    }

    pub async fn send_on_channel(
        &self,
        name: &str,
        payload: Vec<u8>,
        target: Option<&str>,
    ) -> Result<()> {
        self.channels.send_asynchronous(name, payload, target).await
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    // ===== INCOMING COMMANDS =====

    /// Answers a command from another runtime. Failures become an error
    /// response naming this runtime.
    pub(crate) async fn handle_command(&self, envelope: Envelope) -> Response {
        let name = envelope.command.name();
        let sender = envelope.sender.clone();

        let result = match envelope.command {
            Command::RuntimeMetadataUpdate => Ok(Response::Metadata(self.config.metadata.clone())),
            Command::ZoneMetadataUpdate => {
                Ok(Response::ZoneMetadata(self.config.zone_metadata.clone()))
            }
            Command::DomainSnapshotRequest => Ok(Response::Snapshot(self.state.snapshot())),
            Command::Execute { handler, payload } => self
                .handlers
                .execute(&handler, Invocation {
                    sender: sender.clone(),
                    payload,
                })
                .await
                .map(Response::Payload)
                .map_err(|e| FederationError::RemoteError {
                    runtime: self.identity.runtime_name.clone(),
                    message: format!("{:#}", e),
                }),
            command => match self.me.upgrade() {
                Some(this) => self.role.handle(&this, Envelope { sender: sender.clone(), command }).await,
                None => Err(FederationError::NotConnected),
            },
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Failed to handle {} from {}: {}", name, sender, e);
                let message = match e {
                    FederationError::RemoteError { message, .. } => message,
                    other => other.to_string(),
                };
                error_response(self, message)
            }
        }
    }
}
