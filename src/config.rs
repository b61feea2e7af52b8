//! Runtime Configuration
//!
//! Everything a runtime needs to join a domain. Every field has a default, so
//! a JSON file only has to name what differs; the binary layers CLI flags on
//! top.

use crate::dispatcher::CodecKind;
use crate::error::{FederationError, Result};
use crate::membership::naming::{self, SEPARATOR};
use crate::membership::RuntimeIdentity;
use crate::registry::Metadata;
use crate::topology::types::Role;
use crate::transport::ChannelConfig;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DOMAIN_NAME: &str = "federation-domain";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_HTTP_PORT_OFFSET: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipSettings {
    pub bind: SocketAddr,
    pub seeds: Vec<SocketAddr>,
}

impl Default for GossipSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            seeds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub domain_name: String,
    pub runtime_name: String,
    pub zone_name: Option<String>,
    pub role: Role,
    /// Zone role only: pull the zone deployment on join.
    pub synchronize: bool,
    /// Default bound for synchronous sends.
    pub timeout_ms: u64,
    /// Bound on waiting for the first view after connecting.
    pub join_timeout_ms: u64,
    pub snapshot_timeout_ms: u64,
    pub codec: CodecKind,
    /// Transport metadata this runtime advertises, e.g. listener ports.
    pub metadata: Metadata,
    /// Transport metadata advertised for the zone while this runtime leads it.
    pub zone_metadata: Metadata,
    pub default_channel_config: Option<ChannelConfig>,
    pub gossip: GossipSettings,
    pub http_port_offset: u16,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            domain_name: DEFAULT_DOMAIN_NAME.to_string(),
            runtime_name: "runtime".to_string(),
            zone_name: None,
            role: Role::Controller,
            synchronize: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            join_timeout_ms: DEFAULT_TIMEOUT_MS,
            snapshot_timeout_ms: DEFAULT_TIMEOUT_MS,
            codec: CodecKind::default(),
            metadata: Metadata::new(),
            zone_metadata: Metadata::new(),
            default_channel_config: None,
            gossip: GossipSettings::default(),
            http_port_offset: DEFAULT_HTTP_PORT_OFFSET,
        }
    }
}

impl FederationConfig {
    /// Defaults for a runtime of `role`; zone roles need `zone`.
    pub fn for_role(role: Role, runtime_name: &str, zone: Option<&str>) -> Self {
        Self {
            role,
            runtime_name: runtime_name.to_string(),
            zone_name: zone.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FederationError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| FederationError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.domain_name.is_empty() {
            return Err(FederationError::Config("domain_name is empty".to_string()));
        }
        if self.runtime_name.is_empty() {
            return Err(FederationError::Config("runtime_name is empty".to_string()));
        }
        if self.timeout_ms == 0 || self.join_timeout_ms == 0 || self.snapshot_timeout_ms == 0 {
            return Err(FederationError::Config("timeouts must be positive".to_string()));
        }
        if let Some(zone) = &self.zone_name
            && zone.contains(SEPARATOR)
        {
            return Err(FederationError::Config(format!(
                "zone name {:?} contains {:?}",
                zone, SEPARATOR
            )));
        }
        match (self.role.is_authority(), &self.zone_name) {
            (true, Some(zone)) => Err(FederationError::Config(format!(
                "{} runtimes are not zone members, got zone {}",
                self.role.as_str(),
                zone
            ))),
            (false, None) => Err(FederationError::Config(format!(
                "{} runtimes need a zone_name",
                self.role.as_str()
            ))),
            _ => self.identity().map(|_| ()),
        }
    }

    pub fn identity(&self) -> Result<RuntimeIdentity> {
        let identity = RuntimeIdentity {
            kind: self.role.runtime_kind(),
            zone: self.zone_name.clone(),
            runtime_name: self.runtime_name.clone(),
        };
        naming::encode(&identity)?;
        Ok(identity)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    /// The management HTTP address: gossip port shifted by the offset.
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.gossip.bind.ip(),
            self.gossip.bind.port().saturating_add(self.http_port_offset),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: FederationConfig = serde_json::from_str(
            r#"{ "runtime_name": "b", "zone_name": "z1", "role": "zone", "codec": "json" }"#,
        )
        .unwrap();

        assert_eq!(config.domain_name, DEFAULT_DOMAIN_NAME);
        assert_eq!(config.timeout(), Duration::from_millis(10_000));
        assert_eq!(config.snapshot_timeout(), Duration::from_millis(10_000));
        assert!(config.synchronize);
        assert_eq!(config.codec, CodecKind::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_role_zone_mismatch() {
        assert!(FederationConfig::for_role(Role::Zone, "b", None).validate().is_err());
        assert!(FederationConfig::for_role(Role::Node, "b", None).validate().is_err());
        assert!(FederationConfig::for_role(Role::Controller, "a", Some("z1")).validate().is_err());
        assert!(FederationConfig::for_role(Role::Zone, "b", Some("z:1")).validate().is_err());
        assert!(FederationConfig::for_role(Role::Domain, "a", None).validate().is_ok());
    }

    #[test]
    fn test_http_addr_uses_offset() {
        let mut config = FederationConfig::default();
        config.gossip.bind = "127.0.0.1:5001".parse().unwrap();

        assert_eq!(config.http_addr(), "127.0.0.1:6001".parse().unwrap());
    }
}
