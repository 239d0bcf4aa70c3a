//! In-container registry of exposed TCP ports.

use boxd_core::{Result, SandboxError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Lowest port a workload may expose; everything below is privileged.
const MIN_USER_PORT: u16 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    Active,
    Inactive,
}

/// One exposed port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposedPort {
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: PortStatus,
    pub exposed_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Registry of exposed ports; the daemon's own port is never exposable.
pub struct PortRegistry {
    daemon_port: u16,
    ports: RwLock<HashMap<u16, ExposedPort>>,
}

impl PortRegistry {
    pub fn new(daemon_port: u16) -> Self {
        Self {
            daemon_port,
            ports: RwLock::new(HashMap::new()),
        }
    }

    pub async fn expose(&self, port: u16, name: Option<String>) -> Result<ExposedPort> {
        self.validate(port)?;
        let mut ports = self.ports.write().await;
        if ports.contains_key(&port) {
            return Err(SandboxError::PortAlreadyExposed(port));
        }
        let now = Utc::now();
        let entry = ExposedPort {
            port,
            name,
            status: PortStatus::Active,
            exposed_at: now,
            last_active: now,
        };
        ports.insert(port, entry.clone());
        info!(port, name = ?entry.name, "port exposed");
        Ok(entry)
    }

    pub async fn unexpose(&self, port: u16) -> Result<ExposedPort> {
        let removed = self.ports.write().await.remove(&port);
        match removed {
            Some(entry) => {
                info!(port, "port unexposed");
                Ok(entry)
            }
            None => Err(SandboxError::PortNotExposed(port)),
        }
    }

    pub async fn list(&self) -> Vec<ExposedPort> {
        let mut entries: Vec<ExposedPort> = self.ports.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.port);
        entries
    }

    /// Whether proxying to this port is currently allowed.
    pub async fn is_exposed(&self, port: u16) -> bool {
        self.ports.read().await.contains_key(&port)
    }

    /// Record proxy traffic on a port.
    pub async fn touch(&self, port: u16) {
        if let Some(entry) = self.ports.write().await.get_mut(&port) {
            entry.last_active = Utc::now();
        }
    }

    pub async fn mark_inactive(&self, port: u16) -> Result<()> {
        let mut ports = self.ports.write().await;
        match ports.get_mut(&port) {
            Some(entry) => {
                entry.status = PortStatus::Inactive;
                Ok(())
            }
            None => Err(SandboxError::PortNotExposed(port)),
        }
    }

    /// Delete entries whose last activity precedes the threshold; returns
    /// how many were removed.
    pub async fn cleanup_inactive(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let mut ports = self.ports.write().await;
        let before = ports.len();
        ports.retain(|_, entry| {
            entry.status == PortStatus::Active || entry.last_active >= cutoff
        });
        let removed = before - ports.len();
        if removed > 0 {
            debug!(removed, "cleaned up inactive ports");
        }
        removed
    }

    fn validate(&self, port: u16) -> Result<()> {
        if port < MIN_USER_PORT {
            return Err(SandboxError::InvalidPort(format!(
                "port {port} is below the user-addressable range"
            )));
        }
        if port == self.daemon_port {
            return Err(SandboxError::InvalidPort(format!(
                "port {port} is the control-plane port"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expose_list_unexpose_round_trip() {
        let registry = PortRegistry::new(3000);
        registry.expose(8080, Some("web".into())).await.unwrap();

        let listed = registry.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].port, 8080);
        assert_eq!(listed[0].status, PortStatus::Active);

        registry.unexpose(8080).await.unwrap();
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn double_expose_conflicts() {
        let registry = PortRegistry::new(3000);
        registry.expose(8080, None).await.unwrap();
        let err = registry.expose(8080, None).await.unwrap_err();
        assert!(matches!(err, SandboxError::PortAlreadyExposed(8080)));
    }

    #[tokio::test]
    async fn unexpose_missing_port_fails() {
        let registry = PortRegistry::new(3000);
        let err = registry.unexpose(9999).await.unwrap_err();
        assert!(matches!(err, SandboxError::PortNotExposed(9999)));
    }

    #[tokio::test]
    async fn privileged_and_control_ports_rejected() {
        let registry = PortRegistry::new(3000);
        assert!(matches!(
            registry.expose(80, None).await.unwrap_err(),
            SandboxError::InvalidPort(_)
        ));
        assert!(matches!(
            registry.expose(3000, None).await.unwrap_err(),
            SandboxError::InvalidPort(_)
        ));
    }

    #[tokio::test]
    async fn cleanup_removes_only_stale_inactive_entries() {
        let registry = PortRegistry::new(3000);
        registry.expose(8080, None).await.unwrap();
        registry.expose(8081, None).await.unwrap();
        registry.mark_inactive(8081).await.unwrap();

        // Threshold in the future relative to entry timestamps: the
        // inactive entry is stale, the active one is kept regardless.
        let removed = registry.cleanup_inactive(Duration::seconds(-1)).await;
        assert_eq!(removed, 1);
        assert!(registry.is_exposed(8080).await);
        assert!(!registry.is_exposed(8081).await);
    }
}
