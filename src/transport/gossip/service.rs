use super::types::{GossipConfig, GossipMessage, Node, NodeState};
use crate::error::{FederationError, Result};
use crate::membership::{Address, NodeId, View};
use crate::transport::{
    ChannelConfig, ChannelCore, ChannelEvent, ChannelFactory, ChannelHandler, ChannelStats,
    GroupChannel, RequestOptions,
};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

struct PendingRequest {
    target: NodeId,
    reply: oneshot::Sender<std::result::Result<Vec<u8>, String>>,
}

/// State of one connection; rebuilt on every connect.
struct Session {
    cluster: String,
    config: GossipConfig,
    local_node: Node,
    members: DashMap<NodeId, Node>,
    socket: UdpSocket,
    incarnation: RwLock<u64>,
    pending: DashMap<u64, PendingRequest>,
    next_request: AtomicU64,
    view_id: AtomicU64,
    /// False until a seed acknowledged our join. No view is installed before
    /// that, so the first view already lists the group we joined.
    seeded: AtomicBool,
    last_view: Mutex<Vec<Address>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    core: Arc<ChannelCore>,
}

impl Session {
    async fn transmit(&self, msg: &GossipMessage, addr: SocketAddr) -> Result<usize> {
        let encoded =
            bincode::serialize(msg).map_err(|e| FederationError::Encode(e.to_string()))?;
        self.socket.send_to(&encoded, addr).await?;
        Ok(encoded.len())
    }

    fn alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn address_of(&self, node_id: &NodeId) -> Option<Address> {
        self.members.get(node_id).map(|node| node.address())
    }

    /// Installs a new view if the ordered set of alive members changed.
    async fn refresh_view(&self) {
        if !self.seeded.load(Ordering::SeqCst) {
            return;
        }
        let mut alive = self.alive_members();
        alive.sort_by(|a, b| (a.joined_at, &a.id).cmp(&(b.joined_at, &b.id)));
        let members: Vec<Address> = alive.iter().map(Node::address).collect();

        let mut last = self.last_view.lock().await;
        if *last == members {
            return;
        }
        *last = members.clone();

        let view = View::new(self.view_id.fetch_add(1, Ordering::SeqCst) + 1, members);
        info!("Installing view {} with {} members", view.id, view.len());
        self.core.install_view(Some(view.clone()));
        if self.events.send(ChannelEvent::View(view)).is_err() {
            tracing::debug!("View delivery stopped, dropping view");
        }
    }

    /// Outstanding requests to `node_id` can no longer complete.
    fn fail_pending(&self, node_id: &NodeId) {
        self.pending.retain(|_, pending| &pending.target != node_id);
    }

    fn mark_suspected(&self, node: &Node) {
        self.fail_pending(&node.id);
        if self.events.send(ChannelEvent::Suspect(node.address())).is_err() {
            tracing::debug!("View delivery stopped, dropping suspect notice");
        }
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.gossip_interval);

        loop {
            interval.tick().await;

            if !self.seeded.load(Ordering::SeqCst) {
                self.send_join().await;
                continue;
            }

            let alive_members: Vec<Node> = self
                .alive_members()
                .into_iter()
                .filter(|node| node.id != self.local_node.id)
                .collect();

            if alive_members.is_empty() {
                continue;
            }

            use rand::Rng;
            let idx = rand::thread_rng().gen_range(0..alive_members.len());
            let target = &alive_members[idx];

            let mut local = self.local_node.clone();
            local.incarnation = *self.incarnation.read().await;
            let msg = GossipMessage::Ping { from: local };

            if let Err(e) = self.transmit(&msg, target.gossip_addr).await {
                tracing::warn!("Failed to send ping to {:?}: {}", target.id, e);
            } else {
                tracing::debug!("Sent ping to {:?}", target.id);
            }
        }
    }

    async fn send_join(&self) {
        let msg = GossipMessage::Join {
            cluster: self.cluster.clone(),
            node: self.local_node.clone(),
        };
        for seed in &self.config.seeds {
            match self.transmit(&msg, *seed).await {
                Ok(_) => tracing::debug!("Sent join request to {}", seed),
                Err(e) => tracing::warn!("Failed to send join request to {}: {}", seed, e),
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if let Err(e) = self.clone().handle_message(msg, src).await {
                            tracing::error!("Error handling message from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_message(self: Arc<Self>, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Ping { from } => {
                self.handle_ping(from, src).await?;
            }

            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.handle_ack(from, incarnation, members).await;
            }

            GossipMessage::Join { cluster, node } => {
                if cluster != self.cluster {
                    tracing::debug!("Ignoring join of {:?} for group {}", node.id, cluster);
                    return Ok(());
                }
                self.handle_join(node, src).await?;
            }

            GossipMessage::Leave { node_id } => {
                self.handle_leave(node_id).await;
            }

            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => {
                self.handle_suspect(node_id, incarnation).await;
            }

            GossipMessage::Alive {
                node_id,
                incarnation,
            } => {
                self.handle_alive(node_id, incarnation).await;
            }

            GossipMessage::Data { from, payload } => match self.address_of(&from) {
                Some(address) => {
                    if self.events.send(ChannelEvent::Message(address, payload)).is_err() {
                        tracing::debug!("Message delivery stopped");
                    }
                }
                None => tracing::debug!("Dropping data from unknown member {:?}", from),
            },

            GossipMessage::Request { id, from, payload } => {
                let Some(address) = self.address_of(&from) else {
                    tracing::debug!("Dropping request from unknown member {:?}", from);
                    return Ok(());
                };
                self.core.stats.record_received(payload.len());
                let session = self.clone();
                tokio::spawn(async move {
                    let result = match session.core.handler() {
                        Some(handler) => handler
                            .handle_request(address, payload)
                            .await
                            .map_err(|e| e.to_string()),
                        None => Err("no handler installed".to_string()),
                    };
                    if let Ok(reply) = &result {
                        session.core.stats.record_sent(reply.len());
                    }
                    if let Err(e) = session.transmit(&GossipMessage::Reply { id, result }, src).await {
                        tracing::warn!("Failed to send reply {} to {}: {}", id, src, e);
                    }
                });
            }

            GossipMessage::Reply { id, result } => match self.pending.remove(&id) {
                Some((_, pending)) => {
                    if pending.reply.send(result).is_err() {
                        tracing::debug!("Caller of request {} is gone", id);
                    }
                }
                None => tracing::debug!("Late reply {} dropped", id),
            },
        }

        Ok(())
    }

    async fn handle_ping(&self, from: Node, src: SocketAddr) -> Result<()> {
        tracing::debug!("Received ping from {:?}", from.id);

        let from_id = from.id.clone();
        self.merge_member(from).await;
        if let Some(mut member) = self.members.get_mut(&from_id) {
            member.last_seen = Some(Instant::now());
        }

        let all_members: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let my_incarnation = *self.incarnation.read().await;
        let reply = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: my_incarnation,
            members: all_members,
        };

        self.transmit(&reply, src).await?;
        tracing::debug!("Sent ack to {:?} with {} members", from_id, self.members.len());

        self.refresh_view().await;
        Ok(())
    }

    async fn handle_ack(&self, from: NodeId, from_incarnation: u64, members: Vec<Node>) {
        tracing::debug!(
            "Received ack from {:?} (inc={}) with {} members",
            from,
            from_incarnation,
            members.len()
        );

        if let Some(mut member) = self.members.get_mut(&from) {
            if from_incarnation > member.incarnation {
                member.incarnation = from_incarnation;
            }
            member.last_seen = Some(Instant::now());
        }

        for member in members {
            self.merge_member(member).await;
        }

        if !self.seeded.swap(true, Ordering::SeqCst) {
            info!("Join acknowledged by {:?}", from);
        }
        self.refresh_view().await;
    }

    async fn merge_member(&self, new_member: Node) {
        if new_member.id == self.local_node.id {
            return;
        }

        match self.members.get_mut(&new_member.id) {
            Some(mut existing) => {
                if new_member.incarnation > existing.incarnation {
                    tracing::debug!(
                        "Updating {:?}: inc {} -> {}",
                        new_member.id,
                        existing.incarnation,
                        new_member.incarnation,
                    );

                    existing.state = new_member.state;
                    existing.incarnation = new_member.incarnation;
                    existing.last_seen = Some(Instant::now());
                } else if new_member.incarnation == existing.incarnation
                    && new_member.state == NodeState::Alive
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!("{:?} refuted suspicion", new_member.id);
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                if new_member.state == NodeState::Dead {
                    return;
                }
                tracing::info!(
                    "Discovered new member: {} at {}",
                    new_member.name,
                    new_member.gossip_addr
                );

                let mut member_with_timestamp = new_member;
                member_with_timestamp.last_seen = Some(Instant::now());

                self.members
                    .insert(member_with_timestamp.id.clone(), member_with_timestamp);
            }
        }
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) {
        if node_id == self.local_node.id {
            let my_incarnation = {
                let mut inc = self.incarnation.write().await;
                if incarnation < *inc {
                    return;
                }
                *inc = incarnation + 1;
                *inc
            };
            tracing::info!("Refuting suspicion with incarnation {}", my_incarnation);

            if let Some(mut me) = self.members.get_mut(&node_id) {
                me.incarnation = my_incarnation;
            }
            self.broadcast_message(GossipMessage::Alive {
                node_id,
                incarnation: my_incarnation,
            })
            .await;
            return;
        }

        let suspected = match self.members.get_mut(&node_id) {
            Some(mut existing)
                if incarnation >= existing.incarnation && existing.state == NodeState::Alive =>
            {
                tracing::info!("Node {} at {} suspected", existing.name, existing.gossip_addr);
                existing.state = NodeState::Suspect;
                existing.incarnation = incarnation;
                existing.last_seen = Some(Instant::now());
                Some(existing.clone())
            }
            Some(_) => None,
            None => {
                tracing::debug!("Suspected node {:?} doesn't exist", node_id);
                None
            }
        };

        if let Some(node) = suspected {
            self.mark_suspected(&node);
            self.refresh_view().await;
        }
    }

    async fn handle_alive(&self, node_id: NodeId, incarnation: u64) {
        if let Some(mut existing) = self.members.get_mut(&node_id) {
            if incarnation > existing.incarnation
                || (incarnation == existing.incarnation && existing.state == NodeState::Suspect)
            {
                tracing::info!(
                    "Node {} at {} is Alive (inc={})",
                    existing.name,
                    existing.gossip_addr,
                    incarnation
                );
                existing.state = NodeState::Alive;
                existing.incarnation = incarnation;
                existing.last_seen = Some(Instant::now());
            }
        } else {
            tracing::debug!("Alive message for unknown node {:?}", node_id);
        }

        self.refresh_view().await;
    }

    async fn handle_join(&self, mut node: Node, src: SocketAddr) -> Result<()> {
        tracing::info!("Node {} joining group at {}", node.name, node.gossip_addr);

        node.last_seen = Some(Instant::now());
        node.state = NodeState::Alive;
        self.members.insert(node.id.clone(), node);

        tracing::info!("Group size now: {}", self.members.len());

        let all_members: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let reply = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: *self.incarnation.read().await,
            members: all_members,
        };
        self.transmit(&reply, src).await?;

        self.refresh_view().await;
        Ok(())
    }

    async fn handle_leave(&self, node_id: NodeId) {
        if let Some((_, node)) = self.members.remove(&node_id) {
            tracing::info!("Node {} left the group", node.name);
            self.fail_pending(&node_id);
            self.refresh_view().await;
        }
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.failure_detection_interval);

        loop {
            interval.tick().await;
            let outcome = sweep(&self.members, &self.local_node.id, Instant::now(), &self.config);

            for node in &outcome.suspected {
                self.mark_suspected(node);
                self.broadcast_message(GossipMessage::Suspect {
                    node_id: node.id.clone(),
                    incarnation: node.incarnation,
                })
                .await;
            }

            if outcome.dead > 0 {
                tracing::info!("Group size now: {} alive nodes", self.alive_members().len());
            }
            if outcome.pruned > 0 {
                tracing::debug!("Forgot {} dead member(s)", outcome.pruned);
            }
            if !outcome.suspected.is_empty() {
                self.refresh_view().await;
            }
        }
    }

    async fn broadcast_message(&self, msg: GossipMessage) {
        for member in self.alive_members() {
            if member.id == self.local_node.id {
                continue;
            }
            if let Err(e) = self.transmit(&msg, member.gossip_addr).await {
                tracing::warn!("Failed to broadcast to {:?}: {}", member.id, e);
            }
        }
    }
}

/// Group channel over the UDP gossip membership protocol.
///
/// The view is the set of alive members ordered by the time they joined.
pub struct GossipChannel {
    config: GossipConfig,
    logical_name: String,
    session: ArcSwapOption<Session>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    core: Arc<ChannelCore>,
}

impl GossipChannel {
    pub fn new(config: GossipConfig, logical_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            config,
            logical_name: logical_name.into(),
            session: ArcSwapOption::empty(),
            tasks: Mutex::new(Vec::new()),
            core: Arc::new(ChannelCore::default()),
        })
    }

    /// The UDP address actually bound, once connected.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.session
            .load_full()
            .map(|session| session.local_node.gossip_addr)
    }

    fn alive_addr(session: &Session, dest: &Address) -> Result<SocketAddr> {
        session
            .members
            .get(&dest.id)
            .filter(|node| node.state == NodeState::Alive)
            .map(|node| node.gossip_addr)
            .ok_or_else(|| FederationError::suspected(dest.name.clone()))
    }
}

#[async_trait]
impl GroupChannel for GossipChannel {
    async fn connect(&self, cluster: &str) -> Result<()> {
        if self.session.load().is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind(self.config.bind).await?;
        let local_node = Node {
            id: NodeId::new(),
            name: self.logical_name.clone(),
            gossip_addr: socket.local_addr()?,
            state: NodeState::Alive,
            incarnation: 1,
            joined_at: now_ms(),
            last_seen: Some(Instant::now()),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let seeded = self.config.seeds.is_empty();
        let session = Arc::new(Session {
            cluster: cluster.to_string(),
            config: self.config.clone(),
            local_node: local_node.clone(),
            members: DashMap::new(),
            socket,
            incarnation: RwLock::new(1),
            pending: DashMap::new(),
            next_request: AtomicU64::new(1),
            view_id: AtomicU64::new(0),
            seeded: AtomicBool::new(seeded),
            last_view: Mutex::new(Vec::new()),
            events: tx,
            core: self.core.clone(),
        });
        session
            .members
            .insert(local_node.id.clone(), local_node.clone());

        {
            let mut tasks = self.tasks.lock().await;
            tasks.push(self.core.spawn_delivery(rx));
            tasks.push(tokio::spawn(session.clone().receive_loop()));
            tasks.push(tokio::spawn(session.clone().gossip_loop()));
            tasks.push(tokio::spawn(session.clone().failure_detection_loop()));
        }

        self.session.store(Some(session.clone()));
        self.core.stats.set_connected(true);

        if seeded {
            info!("Starting group {} as seed node", cluster);
            session.refresh_view().await;
        } else {
            // The view follows once a seed answers; the gossip loop keeps asking until then.
            info!("Joining group {} via {} seed node(s)", cluster, self.config.seeds.len());
            session.send_join().await;
        }

        Ok(())
    }

    async fn disconnect(&self) {
        let Some(session) = self.session.swap(None) else {
            return;
        };

        session
            .broadcast_message(GossipMessage::Leave {
                node_id: session.local_node.id.clone(),
            })
            .await;

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        session.pending.clear();
        self.core.install_view(None);
        self.core.stats.set_connected(false);
        info!("Left group {}", session.cluster);
    }

    fn is_connected(&self) -> bool {
        self.session.load().is_some()
    }

    fn local_address(&self) -> Option<Address> {
        self.session
            .load_full()
            .map(|session| session.local_node.address())
    }

    fn current_view(&self) -> Option<View> {
        self.core.view()
    }

    fn set_handler(&self, handler: Arc<dyn ChannelHandler>) {
        self.core.set_handler(handler);
    }

    async fn send(&self, dest: Option<&Address>, payload: Vec<u8>) -> Result<()> {
        let session = self.session.load_full().ok_or(FederationError::NotConnected)?;

        let targets = match dest {
            Some(address) => vec![Self::alive_addr(&session, address)?],
            None => session
                .alive_members()
                .into_iter()
                .map(|node| node.gossip_addr)
                .collect(),
        };

        let msg = GossipMessage::Data {
            from: session.local_node.id.clone(),
            payload,
        };
        for target in targets {
            let bytes = session.transmit(&msg, target).await?;
            self.core.stats.record_sent(bytes);
        }
        Ok(())
    }

    async fn request(
        &self,
        dest: &Address,
        payload: Vec<u8>,
        options: RequestOptions,
    ) -> Result<Vec<u8>> {
        let session = self.session.load_full().ok_or(FederationError::NotConnected)?;
        let target = Self::alive_addr(&session, dest)?;

        let id = session.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        session.pending.insert(
            id,
            PendingRequest {
                target: dest.id.clone(),
                reply: tx,
            },
        );

        let msg = GossipMessage::Request {
            id,
            from: session.local_node.id.clone(),
            payload,
        };
        match session.transmit(&msg, target).await {
            Ok(bytes) => self.core.stats.record_sent(bytes),
            Err(e) => {
                session.pending.remove(&id);
                return Err(e);
            }
        }

        match tokio::time::timeout(options.timeout, rx).await {
            Err(_) => {
                session.pending.remove(&id);
                Err(FederationError::timeout(dest.name.clone(), options.timeout))
            }
            Ok(Err(_)) => Err(FederationError::suspected(dest.name.clone())),
            Ok(Ok(Err(message))) => Err(FederationError::RemoteError {
                runtime: dest.name.clone(),
                message,
            }),
            Ok(Ok(Ok(reply))) => {
                self.core.stats.record_received(reply.len());
                Ok(reply)
            }
        }
    }

    fn stats(&self) -> ChannelStats {
        self.core.stats.snapshot()
    }
}

/// Dynamic gossip channels need their own socket: the channel config must
/// carry `bind` and may carry comma-separated `seeds`.
pub struct GossipChannelFactory {
    base: GossipConfig,
}

impl GossipChannelFactory {
    pub fn new(base: GossipConfig) -> Arc<Self> {
        Arc::new(Self { base })
    }
}

impl ChannelFactory for GossipChannelFactory {
    fn create(
        &self,
        logical_name: &str,
        config: Option<&ChannelConfig>,
    ) -> Result<Arc<dyn GroupChannel>> {
        let config = config.ok_or_else(|| {
            FederationError::Config("gossip channels need a configuration with `bind`".to_string())
        })?;
        let bind = config
            .get("bind")
            .ok_or_else(|| FederationError::Config("missing `bind`".to_string()))?
            .parse::<SocketAddr>()
            .map_err(|e| FederationError::Config(format!("invalid `bind`: {}", e)))?;
        let seeds = match config.get("seeds") {
            Some(seeds) => parse_seeds(seeds)?,
            None => Vec::new(),
        };

        let gossip = GossipConfig {
            bind,
            seeds,
            ..self.base.clone()
        };
        Ok(GossipChannel::new(gossip, logical_name))
    }
}

pub fn parse_seeds(value: &str) -> Result<Vec<SocketAddr>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|seed| !seed.is_empty())
        .map(|seed| {
            seed.parse::<SocketAddr>()
                .map_err(|e| FederationError::Config(format!("invalid seed {}: {}", seed, e)))
        })
        .collect()
}

/// Outcome of one failure-detection pass.
#[derive(Debug, Default)]
pub(crate) struct Sweep {
    /// Members that just turned from alive to suspect.
    pub suspected: Vec<Node>,
    pub dead: usize,
    pub pruned: usize,
}

/// Ages every member by its last contact: alive turns suspect after
/// `suspect_timeout`, suspect turns dead after `dead_timeout`, and dead
/// members are dropped once `dead_retention` has passed on top of that.
pub(crate) fn sweep(
    members: &DashMap<NodeId, Node>,
    local: &NodeId,
    now: Instant,
    config: &GossipConfig,
) -> Sweep {
    let mut sweep = Sweep::default();
    let mut expired = Vec::new();

    for mut entry in members.iter_mut() {
        let member = entry.value_mut();
        if &member.id == local {
            continue;
        }

        let Some(last_seen) = member.last_seen else {
            member.last_seen = Some(now);
            continue;
        };
        let elapsed = now.saturating_duration_since(last_seen);

        match member.state {
            NodeState::Alive if elapsed > config.suspect_timeout => {
                tracing::warn!("Node {} suspected (no contact for {:?})", member.name, elapsed);
                member.state = NodeState::Suspect;
                sweep.suspected.push(member.clone());
            }
            NodeState::Suspect if elapsed > config.dead_timeout => {
                tracing::debug!("Node {} declared DEAD (no contact for {:?})", member.name, elapsed);
                member.state = NodeState::Dead;
                sweep.dead += 1;
            }
            NodeState::Dead if elapsed > config.dead_timeout + config.dead_retention => {
                expired.push(member.id.clone());
            }
            _ => {}
        }
    }

    // Removing while iterating would deadlock on the shard locks.
    for id in expired {
        if members.remove(&id).is_some() {
            sweep.pruned += 1;
        }
    }
    sweep
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
