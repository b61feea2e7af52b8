//! In-process Group Transport
//!
//! A [`MemoryNetwork`] hosts any number of named groups. Members join in
//! connect order, which is also view order. Every membership change installs
//! a new view on all remaining members under one lock, so all members see the
//! same sequence of views.
//!
//! Views and one-way messages are queued per channel and delivered by one
//! worker task, which keeps view callbacks serialized. Requests run the
//! target's handler directly under the caller's timeout.
//!
//! Failure injection: [`MemoryNetwork::crash`] removes a member the way a
//! failure detector would (suspect notice, then a new view) and
//! [`MemoryNetwork::mute`] makes a member swallow requests so callers time out.

use super::{
    ChannelConfig, ChannelCore, ChannelEvent, ChannelFactory, ChannelHandler, ChannelStats,
    GroupChannel, RequestOptions,
};
use crate::error::{FederationError, Result};
use crate::membership::{Address, NodeId, View};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

#[derive(Default)]
struct Group {
    view_id: u64,
    members: Vec<Arc<MemoryChannel>>,
}

/// A request as seen by the network, for inspection in tests and tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub from: Address,
    pub target: Address,
    pub options: RequestOptions,
}

#[derive(Default)]
pub struct MemoryNetwork {
    groups: Mutex<HashMap<String, Group>>,
    muted: DashMap<NodeId, ()>,
    requests: Mutex<Vec<RequestRecord>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A new, unconnected channel that will connect with `logical_name`.
    pub fn channel(self: &Arc<Self>, logical_name: impl Into<String>) -> Arc<MemoryChannel> {
        let logical_name = logical_name.into();
        let network = self.clone();
        Arc::new_cyclic(|me| MemoryChannel {
            network,
            logical_name,
            me: me.clone(),
            connection: ArcSwapOption::empty(),
            core: Arc::new(ChannelCore::default()),
        })
    }

    /// Removes `address` from its group as if its process died.
    ///
    /// Remaining members get a suspect notice followed by a new view; the
    /// crashed channel stops receiving anything.
    pub async fn crash(&self, address: &Address) -> bool {
        let mut groups = self.groups.lock().await;
        for group in groups.values_mut() {
            let Some(position) = group
                .members
                .iter()
                .position(|member| member.local_address().as_ref() == Some(address))
            else {
                continue;
            };

            let crashed = group.members.remove(position);
            crashed.detach();
            tracing::info!("Member {} crashed", address);

            for member in &group.members {
                member.enqueue(ChannelEvent::Suspect(address.clone()));
            }
            install(group);
            return true;
        }
        false
    }

    /// A muted member never answers requests; callers run into their timeout.
    pub fn mute(&self, address: &Address, muted: bool) {
        if muted {
            self.muted.insert(address.id.clone(), ());
        } else {
            self.muted.remove(&address.id);
        }
    }

    pub async fn requests(&self) -> Vec<RequestRecord> {
        self.requests.lock().await.clone()
    }

    async fn join(&self, cluster: &str, channel: Arc<MemoryChannel>) {
        let mut groups = self.groups.lock().await;
        let group = groups.entry(cluster.to_string()).or_default();
        group.members.push(channel);
        install(group);
    }

    async fn leave(&self, cluster: &str, address: &Address) {
        let mut groups = self.groups.lock().await;
        let Some(group) = groups.get_mut(cluster) else {
            return;
        };
        let before = group.members.len();
        group
            .members
            .retain(|member| member.local_address().as_ref() != Some(address));
        if group.members.len() != before {
            install(group);
        }
        if group.members.is_empty() {
            groups.remove(cluster);
        }
    }

    async fn member(&self, cluster: &str, address: &Address) -> Option<Arc<MemoryChannel>> {
        let groups = self.groups.lock().await;
        groups
            .get(cluster)?
            .members
            .iter()
            .find(|member| member.local_address().as_ref() == Some(address))
            .cloned()
    }

    async fn members(&self, cluster: &str) -> Vec<Arc<MemoryChannel>> {
        let groups = self.groups.lock().await;
        groups
            .get(cluster)
            .map(|group| group.members.clone())
            .unwrap_or_default()
    }
}

fn install(group: &mut Group) {
    group.view_id += 1;
    let view = View::new(
        group.view_id,
        group
            .members
            .iter()
            .filter_map(|member| member.local_address())
            .collect(),
    );
    tracing::debug!("Installing view {} with {} members", view.id, view.len());
    for member in &group.members {
        member.core.install_view(Some(view.clone()));
        member.enqueue(ChannelEvent::View(view.clone()));
    }
}

struct Connection {
    cluster: String,
    address: Address,
    events: mpsc::UnboundedSender<ChannelEvent>,
    worker: JoinHandle<()>,
}

pub struct MemoryChannel {
    network: Arc<MemoryNetwork>,
    logical_name: String,
    me: Weak<MemoryChannel>,
    connection: ArcSwapOption<Connection>,
    core: Arc<ChannelCore>,
}

impl MemoryChannel {
    fn enqueue(&self, event: ChannelEvent) {
        if let Some(connection) = self.connection.load_full()
            && connection.events.send(event).is_err()
        {
            tracing::debug!("Event queue of {} is closed", self.logical_name);
        }
    }

    /// Drops the connection without telling the group.
    fn detach(&self) {
        if let Some(connection) = self.connection.swap(None) {
            connection.worker.abort();
        }
        self.core.install_view(None);
        self.core.stats.set_connected(false);
    }
}

#[async_trait]
impl GroupChannel for MemoryChannel {
    async fn connect(&self, cluster: &str) -> Result<()> {
        if self.connection.load().is_some() {
            return Ok(());
        }
        let me = self.me.upgrade().ok_or(FederationError::NotConnected)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let address = Address::new(self.logical_name.clone());
        let worker = self.core.spawn_delivery(rx);

        self.connection.store(Some(Arc::new(Connection {
            cluster: cluster.to_string(),
            address: address.clone(),
            events: tx,
            worker,
        })));
        self.core.stats.set_connected(true);
        self.network.join(cluster, me).await;

        tracing::info!("Connected {} to group {}", address, cluster);
        Ok(())
    }

    async fn disconnect(&self) {
        let Some(connection) = self.connection.load_full() else {
            return;
        };
        self.network.leave(&connection.cluster, &connection.address).await;
        self.detach();
        tracing::info!("Disconnected {} from group {}", connection.address, connection.cluster);
    }

    fn is_connected(&self) -> bool {
        self.connection.load().is_some()
    }

    fn local_address(&self) -> Option<Address> {
        self.connection
            .load_full()
            .map(|connection| connection.address.clone())
    }

    fn current_view(&self) -> Option<View> {
        self.core.view()
    }

    fn set_handler(&self, handler: Arc<dyn ChannelHandler>) {
        self.core.set_handler(handler);
    }

    async fn send(&self, dest: Option<&Address>, payload: Vec<u8>) -> Result<()> {
        let connection = self.connection.load_full().ok_or(FederationError::NotConnected)?;

        let targets = match dest {
            Some(address) => match self.network.member(&connection.cluster, address).await {
                Some(member) => vec![member],
                None => return Err(FederationError::suspected(address.name.clone())),
            },
            None => self.network.members(&connection.cluster).await,
        };

        for target in targets {
            self.core.stats.record_sent(payload.len());
            target.enqueue(ChannelEvent::Message(connection.address.clone(), payload.clone()));
        }
        Ok(())
    }

    async fn request(
        &self,
        dest: &Address,
        payload: Vec<u8>,
        options: RequestOptions,
    ) -> Result<Vec<u8>> {
        let connection = self.connection.load_full().ok_or(FederationError::NotConnected)?;
        self.network.requests.lock().await.push(RequestRecord {
            from: connection.address.clone(),
            target: dest.clone(),
            options,
        });

        let target = self
            .network
            .member(&connection.cluster, dest)
            .await
            .ok_or_else(|| FederationError::suspected(dest.name.clone()))?;
        self.core.stats.record_sent(payload.len());

        if self.network.muted.contains_key(&dest.id) {
            tokio::time::sleep(options.timeout).await;
            return Err(FederationError::timeout(dest.name.clone(), options.timeout));
        }

        let handler = target
            .core
            .handler()
            .ok_or_else(|| FederationError::Transport(format!("{} has no handler", dest)))?;
        target.core.stats.record_received(payload.len());

        let call = handler.handle_request(connection.address.clone(), payload);
        match tokio::time::timeout(options.timeout, call).await {
            Err(_) => Err(FederationError::timeout(dest.name.clone(), options.timeout)),
            Ok(Err(FederationError::RemoteError { runtime, message })) => {
                Err(FederationError::RemoteError { runtime, message })
            }
            Ok(Err(e)) => Err(FederationError::RemoteError {
                runtime: dest.name.clone(),
                message: e.to_string(),
            }),
            Ok(Ok(reply)) => {
                target.core.stats.record_sent(reply.len());
                self.core.stats.record_received(reply.len());
                Ok(reply)
            }
        }
    }

    fn stats(&self) -> ChannelStats {
        self.core.stats.snapshot()
    }
}

/// Creates dynamic channels on a shared [`MemoryNetwork`]; configuration is ignored.
pub struct MemoryChannelFactory {
    network: Arc<MemoryNetwork>,
}

impl MemoryChannelFactory {
    pub fn new(network: Arc<MemoryNetwork>) -> Arc<Self> {
        Arc::new(Self { network })
    }
}

impl ChannelFactory for MemoryChannelFactory {
    fn create(
        &self,
        logical_name: &str,
        _config: Option<&ChannelConfig>,
    ) -> Result<Arc<dyn GroupChannel>> {
        Ok(self.network.channel(logical_name))
    }
}
