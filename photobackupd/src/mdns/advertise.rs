use std::collections::HashMap;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use shared::protocol::{PHOTOBACKUP_SERVICE_TYPE, STATUS_PATH, UPLOAD_PATH};
use crate::error::{Error, Result};

/// What gets announced on the LAN for one running listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub service_name: String,
    pub service_type: String,
    pub port: u16,
    pub host_identifier: String,
}

impl DiscoveryRecord {
    /// Record for this machine, using the system hostname
    pub fn for_local_host(service_name: &str, port: u16) -> Self {
        let host_identifier = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to get system hostname: {}", e);
                "localhost".to_string()
            });

        Self {
            service_name: service_name.to_string(),
            service_type: PHOTOBACKUP_SERVICE_TYPE.to_string(),
            port,
            host_identifier,
        }
    }

    /// mDNS host names live under `.local.`
    fn mdns_host_name(&self) -> String {
        let host = self.host_identifier.trim_end_matches('.');
        if host.ends_with(".local") {
            format!("{}.", host)
        } else {
            format!("{}.local.", host)
        }
    }
}

/// A published (or failed-to-publish) record. Dropping it does not retract.
pub struct Advertisement {
    active: Option<(ServiceDaemon, String)>,
}

impl Advertisement {
    pub fn inactive() -> Self {
        Self { active: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Withdraw the record and stop the mDNS daemon. Calling it again does nothing.
    pub fn retract(&mut self) {
        let Some((daemon, fullname)) = self.active.take() else {
            return;
        };

        match daemon.unregister(&fullname) {
            Ok(_) => tracing::info!("Unregistered {}", fullname),
            Err(e) => tracing::warn!("Failed to unregister mDNS service {}: {}", fullname, e),
        }

        if let Err(e) = daemon.shutdown() {
            tracing::warn!("Failed to shutdown mDNS daemon: {}", e);
        }
    }
}

/// Announce `record` on the LAN. Failures are logged and yield an inactive advertisement.
pub fn publish(record: &DiscoveryRecord, interface: Option<&str>) -> Advertisement {
    match register(record, interface) {
        Ok(active) => Advertisement {
            active: Some(active),
        },
        Err(e) => {
            tracing::warn!("LAN discovery unavailable, continuing without it: {}", e);
            Advertisement::inactive()
        }
    }
}

fn register(record: &DiscoveryRecord, interface: Option<&str>) -> Result<(ServiceDaemon, String)> {
    let daemon = ServiceDaemon::new().map_err(discovery_error("create mDNS daemon"))?;

    if let Some(interface) = interface {
        daemon
            .disable_interface(mdns_sd::IfKind::All)
            .map_err(discovery_error("disable default interfaces"))?;
        daemon
            .enable_interface(interface)
            .map_err(discovery_error("enable interface"))?;
    }

    let txt_records = HashMap::from([
        ("status".to_string(), STATUS_PATH.to_string()),
        ("upload".to_string(), UPLOAD_PATH.to_string()),
    ]);

    let service_info = ServiceInfo::new(
        &record.service_type,
        &record.service_name,
        &record.mdns_host_name(),
        "",
        record.port,
        txt_records,
    )
    .map_err(discovery_error("create ServiceInfo"))?
    .enable_addr_auto();

    let fullname = service_info.get_fullname().to_string();

    if let Err(e) = daemon.register(service_info) {
        let _ = daemon.shutdown();
        return Err(Error::Discovery(format!("register mDNS service: {}", e)));
    }

    tracing::info!(
        "Registered {} as {} on port {}",
        record.service_type,
        record.service_name,
        record.port
    );

    Ok((daemon, fullname))
}

fn discovery_error(action: &'static str) -> impl Fn(mdns_sd::Error) -> Error {
    move |e| Error::Discovery(format!("{}: {}", action, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(host: &str) -> DiscoveryRecord {
        DiscoveryRecord {
            service_name: "iPhone Photo Backup".to_string(),
            service_type: PHOTOBACKUP_SERVICE_TYPE.to_string(),
            port: 3000,
            host_identifier: host.to_string(),
        }
    }

    #[test]
    fn test_host_name_gets_local_suffix() {
        assert_eq!(record("studio").mdns_host_name(), "studio.local.");
        assert_eq!(record("studio.local").mdns_host_name(), "studio.local.");
        assert_eq!(record("studio.local.").mdns_host_name(), "studio.local.");
    }

    #[test]
    fn test_local_record_uses_service_type() {
        let record = DiscoveryRecord::for_local_host("Backup", 4100);
        assert_eq!(record.service_type, "_photobackup._tcp.local.");
        assert_eq!(record.port, 4100);
        assert!(!record.host_identifier.is_empty());
    }

    #[test]
    fn test_retract_is_idempotent() {
        let mut ad = Advertisement::inactive();
        assert!(!ad.is_active());
        ad.retract();
        ad.retract();
        assert!(!ad.is_active());
    }

    #[test]
    fn test_bad_interface_is_not_fatal() {
        let mut ad = publish(&record("studio"), Some("no-such-interface-0"));
        // Either mDNS is unavailable or the interface is unknown; both leave us usable
        ad.retract();
        assert!(!ad.is_active());
    }
}
