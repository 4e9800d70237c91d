use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use crate::interface::HostIdentity;

/// Identity fixed at construction, useful when the engine already knows it.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    hostname: String,
    address: String,
}

impl StaticIdentity {
    pub fn new(hostname: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
        }
    }
}

impl HostIdentity for StaticIdentity {
    fn identity(&self) -> (String, String) {
        (self.hostname.clone(), self.address.clone())
    }
}

/// Identity of the machine the runner is on, resolved once.
#[derive(Debug, Clone)]
pub struct SystemIdentity {
    inner: StaticIdentity,
}

impl SystemIdentity {
    pub fn detect() -> Self {
        Self {
            inner: StaticIdentity::new(detect_hostname(), detect_address().to_string()),
        }
    }
}

impl HostIdentity for SystemIdentity {
    fn identity(&self) -> (String, String) {
        self.inner.identity()
    }
}

fn detect_hostname() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

// Connecting a UDP socket sends nothing; it only asks the OS which local
// interface would route outward.
fn detect_address() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
