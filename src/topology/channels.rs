//! Dynamic Channels
//!
//! Named group channels opened on demand next to the domain channel, each
//! with its own connection, view and listener fan-out. A name is taken from
//! the moment an open starts until the channel is closed, so of two
//! concurrent opens of the same name exactly one wins.

use crate::error::{FederationError, Result};
use crate::membership::{Address, View, diff, naming};
use crate::registry::{ListenerId, ListenerMultiplexer, TopologyListener};
use crate::transport::{ChannelConfig, ChannelFactory, ChannelHandler, GroupChannel};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Application callback for messages on a dynamic channel.
#[async_trait]
pub trait ChannelReceiver: Send + Sync {
    /// `sender` is the runtime name of the sending member.
    async fn on_message(&self, sender: String, payload: Vec<u8>);
}

/// Explicit configuration wins over the service default; without either
/// the transport uses its own defaults.
pub fn resolve_config<'a>(
    explicit: Option<&'a ChannelConfig>,
    default: Option<&'a ChannelConfig>,
) -> Option<&'a ChannelConfig> {
    explicit.or(default)
}

struct OpenChannel {
    channel: Arc<dyn GroupChannel>,
    listeners: Arc<ListenerMultiplexer>,
}

enum ChannelSlot {
    Opening,
    Open(Arc<OpenChannel>),
}

/// Filters out our own messages and turns views into listener events.
struct DelegatingReceiver {
    local_name: String,
    receiver: Arc<dyn ChannelReceiver>,
    listeners: Arc<ListenerMultiplexer>,
    previous: ArcSwapOption<View>,
}

#[async_trait]
impl ChannelHandler for DelegatingReceiver {
    fn view_accepted(&self, view: View) {
        let previous = self.previous.swap(Some(Arc::new(view.clone())));
        self.listeners.dispatch(&diff::compute(previous.as_deref(), &view));
    }

    async fn receive(&self, from: Address, payload: Vec<u8>) {
        if from.name == self.local_name {
            return;
        }
        let sender = naming::runtime_name_of(&from).unwrap_or(from.name);
        self.receiver.on_message(sender, payload).await;
    }

    async fn handle_request(&self, _from: Address, _payload: Vec<u8>) -> Result<Vec<u8>> {
        Err(FederationError::IllegalOperation {
            role: "dynamic channel".to_string(),
            operation: "request",
        })
    }
}

pub struct ChannelManager {
    factory: Arc<dyn ChannelFactory>,
    default_config: Option<ChannelConfig>,
    /// Logical name this runtime connects every dynamic channel with.
    local_name: String,
    slots: DashMap<String, ChannelSlot>,
}

impl ChannelManager {
    pub fn new(
        factory: Arc<dyn ChannelFactory>,
        default_config: Option<ChannelConfig>,
        local_name: impl Into<String>,
    ) -> Self {
        Self {
            factory,
            default_config,
            local_name: local_name.into(),
            slots: DashMap::new(),
        }
    }

    pub async fn open_channel(
        &self,
        name: &str,
        config: Option<&ChannelConfig>,
        receiver: Arc<dyn ChannelReceiver>,
    ) -> Result<()> {
        match self.slots.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(FederationError::ChannelAlreadyOpen(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(ChannelSlot::Opening);
            }
        }

        match self.connect(name, config, receiver).await {
            Ok(open) => {
                self.slots.insert(name.to_string(), ChannelSlot::Open(open));
                tracing::info!("Opened channel {}", name);
                Ok(())
            }
            Err(e) => {
                self.slots.remove(name);
                tracing::warn!("Failed to open channel {}: {}", name, e);
                Err(e)
            }
        }
    }

    async fn connect(
        &self,
        name: &str,
        config: Option<&ChannelConfig>,
        receiver: Arc<dyn ChannelReceiver>,
    ) -> Result<Arc<OpenChannel>> {
        let config = resolve_config(config, self.default_config.as_ref());
        let channel = self.factory.create(&self.local_name, config)?;
        let listeners = ListenerMultiplexer::new();

        channel.set_handler(Arc::new(DelegatingReceiver {
            local_name: self.local_name.clone(),
            receiver,
            listeners: listeners.clone(),
            previous: ArcSwapOption::empty(),
        }));
        channel.connect(name).await?;

        Ok(Arc::new(OpenChannel { channel, listeners }))
    }

    pub async fn close_channel(&self, name: &str) -> Result<()> {
        let open = match self
            .slots
            .remove_if(name, |_, slot| matches!(slot, ChannelSlot::Open(_)))
        {
            Some((_, ChannelSlot::Open(open))) => open,
            _ => return Err(FederationError::ChannelNotFound(name.to_string())),
        };
        open.channel.disconnect().await;
        tracing::info!("Closed channel {}", name);
        Ok(())
    }

    /// Closes every open channel; errors are logged by the transport.
    pub async fn close_all(&self) {
        for name in self.channel_names() {
            if let Err(e) = self.close_channel(&name).await {
                tracing::debug!("Channel {} already gone: {}", name, e);
            }
        }
    }

    fn open(&self, name: &str) -> Result<Arc<OpenChannel>> {
        match self.slots.get(name).as_deref() {
            Some(ChannelSlot::Open(open)) => Ok(open.clone()),
            _ => Err(FederationError::ChannelNotFound(name.to_string())),
        }
    }

    /// Sends on channel `name`, to every member or only to `target`, which
    /// is resolved against the channel's own view.
    pub async fn send_asynchronous(
        &self,
        name: &str,
        payload: Vec<u8>,
        target: Option<&str>,
    ) -> Result<()> {
        let open = self.open(name)?;
        let dest = match target {
            Some(runtime) => {
                let view = open
                    .channel
                    .current_view()
                    .ok_or(FederationError::NotConnected)?;
                Some(
                    naming::resolve(runtime, &view)
                        .ok_or_else(|| FederationError::RuntimeNotFound(runtime.to_string()))?,
                )
            }
            None => None,
        };
        open.channel.send(dest.as_ref(), payload).await
    }

    pub fn register_listener(
        &self,
        name: &str,
        listener: Arc<dyn TopologyListener>,
    ) -> Result<ListenerId> {
        Ok(self.open(name)?.listeners.register(listener))
    }

    pub fn deregister_listener(&self, name: &str, id: ListenerId) -> Result<bool> {
        Ok(self.open(name)?.listeners.deregister(id))
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.open(name).is_ok()
    }

    pub fn view(&self, name: &str) -> Result<Option<View>> {
        Ok(self.open(name)?.channel.current_view())
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| matches!(entry.value(), ChannelSlot::Open(_)))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}
