//! DNS-SD service advertisement
//!
//! The listener is published under a fixed service type so clients on the
//! local network can find the gateway without knowing its (ephemeral) port.

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::DiscoveryError;

/// What gets published for one listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    /// e.g. `_mcp._tcp`
    pub service_type: String,
    pub instance_name: String,
    pub port: u16,
}

impl ServiceRegistration {
    /// Fully-qualified DNS-SD type, e.g. `_mcp._tcp.local.`
    pub fn qualified_type(&self) -> String {
        qualify(&self.service_type)
    }
}

fn qualify(service_type: &str) -> String {
    let trimmed = service_type.trim_end_matches('.');
    if trimmed.ends_with(".local") {
        format!("{}.", trimmed)
    } else {
        format!("{}.local.", trimmed)
    }
}

pub trait ServiceAdvertiser: Send + Sync {
    /// Publish `registration`, replacing any previous one
    fn advertise(&self, registration: &ServiceRegistration) -> Result<(), DiscoveryError>;

    /// Remove the current advertisement, if any
    fn withdraw(&self);
}

/// Advertiser for hosts that do not publish the listener
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAdvertiser;

impl ServiceAdvertiser for NoopAdvertiser {
    fn advertise(&self, registration: &ServiceRegistration) -> Result<(), DiscoveryError> {
        debug!(port = registration.port, "[Discovery] Advertisement disabled");
        Ok(())
    }

    fn withdraw(&self) {}
}

/// Multicast DNS advertiser backed by `mdns-sd`
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    registered: Mutex<Option<String>>,
}

impl MdnsAdvertiser {
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Advertise(e.to_string()))?;
        Ok(Self {
            daemon,
            registered: Mutex::new(None),
        })
    }

    fn host_name(instance_name: &str) -> String {
        let label: String = instance_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("{}.local.", label.trim_matches('-').to_lowercase())
    }
}

impl ServiceAdvertiser for MdnsAdvertiser {
    fn advertise(&self, registration: &ServiceRegistration) -> Result<(), DiscoveryError> {
        self.withdraw();

        let properties = [("version", env!("CARGO_PKG_VERSION"))];
        let info = ServiceInfo::new(
            &registration.qualified_type(),
            &registration.instance_name,
            &Self::host_name(&registration.instance_name),
            "",
            registration.port,
            &properties[..],
        )
        .map_err(|e| DiscoveryError::Advertise(e.to_string()))?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        self.daemon
            .register(info)
            .map_err(|e| DiscoveryError::Advertise(e.to_string()))?;

        info!(
            service = %fullname,
            port = registration.port,
            "[Discovery] Advertised gateway"
        );
        *self.registered.lock() = Some(fullname);
        Ok(())
    }

    fn withdraw(&self) {
        let Some(fullname) = self.registered.lock().take() else {
            return;
        };
        match self.daemon.unregister(&fullname) {
            Ok(_) => debug!(service = %fullname, "[Discovery] Advertisement withdrawn"),
            Err(e) => warn!(service = %fullname, error = %e, "[Discovery] Failed to withdraw"),
        }
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        self.withdraw();
        let _ = self.daemon.shutdown();
    }
}

/// A gateway found on the local network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredGateway {
    pub fullname: String,
    pub host: String,
    pub port: u16,
    pub addresses: BTreeSet<IpAddr>,
}

/// Collect the gateways that resolve within `wait`
pub async fn browse(service_type: &str, wait: Duration) -> Result<Vec<DiscoveredGateway>, DiscoveryError> {
    let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Browse(e.to_string()))?;
    let qualified = qualify(service_type);
    let receiver = daemon
        .browse(&qualified)
        .map_err(|e| DiscoveryError::Browse(e.to_string()))?;

    let deadline = tokio::time::Instant::now() + wait;
    let mut found = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, receiver.recv_async()).await {
        if let ServiceEvent::ServiceResolved(info) = event {
            found.push(DiscoveredGateway {
                fullname: info.get_fullname().to_string(),
                host: info.get_hostname().to_string(),
                port: info.get_port(),
                addresses: info.get_addresses().iter().copied().collect(),
            });
        }
    }

    let _ = daemon.stop_browse(&qualified);
    let _ = daemon.shutdown();
    Ok(found)
}
