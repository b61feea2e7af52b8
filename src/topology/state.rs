//! Domain State and Deployments
//!
//! `DomainState` is the key/value document store a Node-role runtime pulls
//! from the oldest member when it joins. `DeploymentStore` is the simplest
//! deployment backend: the controller reads zone deployments from it, zone
//! runtimes record what they applied.

use crate::dispatcher::protocol::{Deployment, DomainSnapshot};
use crate::error::{FederationError, Result};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct DomainState {
    entries: DashMap<String, serde_json::Value>,
    version: AtomicU64,
}

impl DomainState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put<V: Serialize>(&self, key: &str, value: &V) -> Result<()> {
        let value =
            serde_json::to_value(value).map_err(|e| FederationError::Encode(e.to_string()))?;
        self.entries.insert(key.to_string(), value);
        self.version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        let Some(value) = self.entries.get(key).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| FederationError::Decode(e.to_string()))
    }

    pub fn remove(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.version.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> DomainSnapshot {
        let entries: BTreeMap<String, String> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().to_string()))
            .collect();
        DomainSnapshot {
            version: self.version(),
            entries,
        }
    }

    /// Copies every snapshot entry over the local one. Nothing is merged if
    /// any entry fails to parse.
    pub fn merge(&self, snapshot: DomainSnapshot) -> Result<usize> {
        let mut parsed = Vec::with_capacity(snapshot.entries.len());
        for (key, raw) in snapshot.entries {
            let value: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| FederationError::Decode(format!("snapshot entry {}: {}", key, e)))?;
            parsed.push((key, value));
        }

        let merged = parsed.len();
        for (key, value) in parsed {
            self.entries.insert(key, value);
        }
        self.version.fetch_max(snapshot.version, Ordering::SeqCst);
        Ok(merged)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Where an authority looks up the deployment of a zone.
pub trait DeploymentSource: Send + Sync {
    fn deployment_for(&self, zone: &str) -> Option<Deployment>;
}

/// What a zone runtime does with a deployment it received.
#[async_trait]
pub trait DeploymentSink: Send + Sync {
    async fn apply(&self, deployment: Deployment) -> anyhow::Result<()>;
}

/// In-memory deployment backend serving both sides.
#[derive(Default)]
pub struct DeploymentStore {
    deployments: DashMap<String, Deployment>,
    applied: DashMap<String, Deployment>,
}

impl DeploymentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replaces the contributions deployed to `zone`, bumping its revision.
    pub fn deploy(&self, zone: &str, contributions: Vec<String>) -> Deployment {
        let revision = self
            .deployments
            .get(zone)
            .map(|current| current.revision + 1)
            .unwrap_or(1);
        let deployment = Deployment {
            zone: zone.to_string(),
            revision,
            contributions,
        };
        self.deployments.insert(zone.to_string(), deployment.clone());
        tracing::info!("Zone {} deployment at revision {}", zone, revision);
        deployment
    }

    pub fn applied(&self, zone: &str) -> Option<Deployment> {
        self.applied.get(zone).map(|entry| entry.value().clone())
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

impl DeploymentSource for DeploymentStore {
    /// A zone with nothing deployed gets an empty revision 0.
    fn deployment_for(&self, zone: &str) -> Option<Deployment> {
        let deployment = self
            .deployments
            .get(zone)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| Deployment {
                zone: zone.to_string(),
                revision: 0,
                contributions: Vec::new(),
            });
        Some(deployment)
    }
}

#[async_trait]
impl DeploymentSink for DeploymentStore {
    async fn apply(&self, deployment: Deployment) -> anyhow::Result<()> {
        tracing::info!(
            "Applying deployment of zone {} (revision {}, {} contribution(s))",
            deployment.zone,
            deployment.revision,
            deployment.contributions.len()
        );
        self.applied.insert(deployment.zone.clone(), deployment);
        Ok(())
    }
}
