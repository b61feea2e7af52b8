//! Group Communication Transport
//!
//! The membership and messaging layer sits on top of a group channel that
//! provides reliable delivery, failure detection and ordered views. This
//! module is the seam: [`GroupChannel`] is consumed, [`ChannelHandler`] is the
//! callback surface a channel drives.
//!
//! ## Implementations
//! - **`memory`**: in-process hub; deterministic, used by tests and embedded setups.
//! - **`gossip`**: UDP SWIM-style membership with request/response frames.
//!
//! ## Delivery contract
//! - View callbacks for one channel are delivered in order and never concurrently.
//! - Message and request callbacks may run concurrently with each other and with views.

pub mod gossip;
pub mod memory;

use crate::error::Result;
use crate::membership::{Address, View};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How a request collects responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseMode {
    /// The first response wins.
    GetFirst,
    /// Wait for every addressed member.
    GetAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub timeout: Duration,
    pub mode: ResponseMode,
}

impl RequestOptions {
    pub fn get_first(timeout: Duration) -> Self {
        Self {
            timeout,
            mode: ResponseMode::GetFirst,
        }
    }

    pub fn get_all(timeout: Duration) -> Self {
        Self {
            timeout,
            mode: ResponseMode::GetAll,
        }
    }
}

/// Transport-specific settings for a channel, e.g. a gossip bind address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ChannelConfig {
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Read-only counters; querying them has no side effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub connected: bool,
    pub sent_messages: u64,
    pub sent_bytes: u64,
    pub received_messages: u64,
    pub received_bytes: u64,
}

#[derive(Debug, Default)]
pub struct StatsCounters {
    connected: AtomicBool,
    sent_messages: AtomicU64,
    sent_bytes: AtomicU64,
    received_messages: AtomicU64,
    received_bytes: AtomicU64,
}

impl StatsCounters {
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.sent_messages.fetch_add(1, Ordering::Relaxed);
        self.sent_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.received_messages.fetch_add(1, Ordering::Relaxed);
        self.received_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            connected: self.connected.load(Ordering::Relaxed),
            sent_messages: self.sent_messages.load(Ordering::Relaxed),
            sent_bytes: self.sent_bytes.load(Ordering::Relaxed),
            received_messages: self.received_messages.load(Ordering::Relaxed),
            received_bytes: self.received_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Callbacks a connected channel delivers to its owner.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// A new view was installed. Must not block; long work belongs on a task.
    fn view_accepted(&self, view: View);

    /// The failure detector suspects `address`. A view without it follows.
    fn suspect(&self, _address: &Address) {}

    /// One-way message.
    async fn receive(&self, from: Address, payload: Vec<u8>);

    /// Request expecting a reply. An `Err` is reported to the caller as a
    /// remote error.
    async fn handle_request(&self, from: Address, payload: Vec<u8>) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait GroupChannel: Send + Sync {
    /// Joins the group `cluster`; the transport assigns the local address.
    async fn connect(&self, cluster: &str) -> Result<()>;

    /// Leaves the group. Errors while tearing down are logged, not returned.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn local_address(&self) -> Option<Address>;

    fn current_view(&self) -> Option<View>;

    fn set_handler(&self, handler: Arc<dyn ChannelHandler>);

    /// Fire-and-forget; `None` addresses every current member.
    async fn send(&self, dest: Option<&Address>, payload: Vec<u8>) -> Result<()>;

    /// Request/response bounded by `options.timeout`.
    async fn request(
        &self,
        dest: &Address,
        payload: Vec<u8>,
        options: RequestOptions,
    ) -> Result<Vec<u8>>;

    fn stats(&self) -> ChannelStats;
}

pub(crate) enum ChannelEvent {
    View(View),
    Suspect(Address),
    Message(Address, Vec<u8>),
}

/// Handler slot, installed view and counters shared between a channel and
/// the tasks that drive it.
#[derive(Default)]
pub(crate) struct ChannelCore {
    handler: ArcSwapOption<Arc<dyn ChannelHandler>>,
    view: ArcSwapOption<View>,
    pub(crate) stats: StatsCounters,
}

impl ChannelCore {
    pub(crate) fn set_handler(&self, handler: Arc<dyn ChannelHandler>) {
        self.handler.store(Some(Arc::new(handler)));
    }

    pub(crate) fn handler(&self) -> Option<Arc<dyn ChannelHandler>> {
        self.handler.load_full().map(|handler| Arc::clone(&*handler))
    }

    pub(crate) fn view(&self) -> Option<View> {
        self.view.load_full().map(|view| View::clone(&view))
    }

    pub(crate) fn install_view(&self, view: Option<View>) {
        self.view.store(view.map(Arc::new));
    }

    /// Delivers queued events in order, which serializes view callbacks.
    /// Each one-way message is handed to its own task so a slow receiver
    /// never holds up membership delivery.
    pub(crate) fn spawn_delivery(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> JoinHandle<()> {
        let core = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(handler) = core.handler() else {
                    tracing::debug!("No handler installed, dropping channel event");
                    continue;
                };
                match event {
                    ChannelEvent::View(view) => handler.view_accepted(view),
                    ChannelEvent::Suspect(address) => handler.suspect(&address),
                    ChannelEvent::Message(from, payload) => {
                        core.stats.record_received(payload.len());
                        tokio::spawn(async move {
                            handler.receive(from, payload).await;
                        });
                    }
                }
            }
        })
    }
}

/// Creates independently connected channels on demand (dynamic channels).
pub trait ChannelFactory: Send + Sync {
    fn create(
        &self,
        logical_name: &str,
        config: Option<&ChannelConfig>,
    ) -> Result<Arc<dyn GroupChannel>>;
}
