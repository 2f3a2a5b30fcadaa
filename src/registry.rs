//! Host interface enumeration and the label→device bindings.
//!
//! Enumeration happens on every lookup so address changes on the host
//! (cable yanked, Wi-Fi rejoined) propagate without a restart.
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::RwLock;

use log::*;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use nix::sys::socket::SockAddr;

use crate::model::rules::host_ip;
use crate::model::{Error, ErrorKind, Label};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfaceKind {
    Cable,
    Wifi,
    Virtual,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6Record {
    pub addr: Ipv6Addr,
    pub link_local: bool,
}

/// One host interface in use: at least one address, not loopback.
#[derive(Debug, Clone)]
pub struct IfaceRecord {
    pub device: String,
    pub kind: IfaceKind,
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Record>,
    pub up: bool,
    pub mtu: Option<u32>,
}

pub struct IfaceRegistry {
    /// label -> device name, replaced wholesale on reload
    bindings: RwLock<HashMap<Label, String>>,
}

impl IfaceRegistry {
    pub fn new(bindings: HashMap<Label, String>) -> Self {
        Self {
            bindings: RwLock::new(bindings),
        }
    }

    /// Replace every label binding. Dials in flight keep the sockets they
    /// already opened.
    pub fn rebind(&self, bindings: HashMap<Label, String>) {
        let mut current = self
            .bindings
            .write()
            .unwrap_or_else(|err| err.into_inner());
        *current = bindings;
    }

    pub fn device_for(&self, label: &Label) -> Result<String, Error> {
        self.bindings
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(label)
            .cloned()
            .ok_or_else(|| ErrorKind::interface_unavailable(label).into())
    }

    /// Enumerate host interfaces, loopback and address-less ones excluded.
    pub fn list_interfaces(&self) -> Result<Vec<IfaceRecord>, Error> {
        let bindings = self
            .bindings
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone();
        enumerate(&bindings)
    }

    fn record_for(&self, label: &Label) -> Result<IfaceRecord, Error> {
        let device = self.device_for(label)?;
        self.list_interfaces()?
            .into_iter()
            .find(|rec| rec.device == device)
            .ok_or_else(|| ErrorKind::interface_unavailable(label).into())
    }

    /// First IPv4 address of the interface bound to `label`, port 0.
    pub fn local_addr(&self, label: &Label) -> Result<SocketAddr, Error> {
        let rec = self.record_for(label)?;
        rec.ipv4
            .first()
            .map(|ip| SocketAddr::new(IpAddr::V4(*ip), 0))
            .ok_or_else(|| ErrorKind::interface_unavailable(label).into())
    }

    /// Local bind address whose family matches the target host.
    ///
    /// An IPv6 literal target requires a global (non-link-local) IPv6
    /// address on the interface; everything else (IPv4 literal or domain
    /// name) binds IPv4.
    pub fn local_addr_for_target(&self, label: &Label, target_host: &str) -> Result<SocketAddr, Error> {
        match host_ip(target_host) {
            Some(IpAddr::V6(_)) => {
                let rec = self.record_for(label)?;
                if rec.ipv6.is_empty() {
                    return Err(ErrorKind::InterfaceNoIpv6 { device: rec.device }.into());
                }
                rec.ipv6
                    .iter()
                    .find(|r| !r.link_local)
                    .map(|r| SocketAddr::new(IpAddr::V6(r.addr), 0))
                    .ok_or_else(|| ErrorKind::InterfaceIpv6Unusable { device: rec.device }.into())
            }
            _ => self.local_addr(label),
        }
    }

    /// Scan for plausible default devices when the configuration gives
    /// none that resolve: first up cable-looking interface with an IPv4
    /// address, first wifi-looking likewise.
    pub fn detect_defaults() -> (Option<String>, Option<String>) {
        let records = match enumerate(&HashMap::new()) {
            Ok(records) => records,
            Err(err) => {
                warn!("interface scan failed: {}", err);
                return (None, None);
            }
        };
        let mut cable = None;
        let mut wifi = None;
        for rec in records {
            if !rec.up || rec.ipv4.is_empty() {
                continue;
            }
            match rec.kind {
                IfaceKind::Cable if cable.is_none() => cable = Some(rec.device),
                IfaceKind::Wifi if wifi.is_none() => wifi = Some(rec.device),
                _ => {}
            }
        }
        (cable, wifi)
    }
}

fn enumerate(bindings: &HashMap<Label, String>) -> Result<Vec<IfaceRecord>, Error> {
    let addrs = getifaddrs().map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    // getifaddrs yields one entry per (interface, address); group by
    // interface preserving enumeration order
    let mut order: Vec<String> = vec![];
    let mut records: HashMap<String, IfaceRecord> = HashMap::new();

    for ifaddr in addrs {
        let flags = ifaddr.flags;
        if flags.contains(InterfaceFlags::IFF_LOOPBACK) {
            continue;
        }
        let name = ifaddr.interface_name;
        if !records.contains_key(&name) {
            order.push(name.clone());
        }
        let rec = records.entry(name.clone()).or_insert_with(|| IfaceRecord {
            device: name.clone(),
            kind: classify(&name, bindings),
            ipv4: vec![],
            ipv6: vec![],
            up: flags.contains(InterfaceFlags::IFF_UP),
            mtu: device_mtu(&name),
        });
        if let Some(SockAddr::Inet(inet)) = ifaddr.address {
            match inet.to_std().ip() {
                IpAddr::V4(v4) => rec.ipv4.push(v4),
                IpAddr::V6(v6) => rec.ipv6.push(Ipv6Record {
                    link_local: is_link_local_v6(&v6),
                    addr: v6,
                }),
            }
        }
    }

    // interfaces without any address are of no use as a bind source
    Ok(order
        .into_iter()
        .filter_map(|name| records.remove(&name))
        .filter(|rec| !rec.ipv4.is_empty() || !rec.ipv6.is_empty())
        .collect())
}

/// fe80::/10
fn is_link_local_v6(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

fn classify(device: &str, bindings: &HashMap<Label, String>) -> IfaceKind {
    for (label, bound) in bindings {
        if bound == device {
            if label == &Label::cable() {
                return IfaceKind::Cable;
            }
            if label == &Label::wifi() {
                return IfaceKind::Wifi;
            }
        }
    }

    let name = device.to_ascii_lowercase();
    const WIFI: &[&str] = &["wlan", "wlp", "wlx", "wl"];
    const CABLE: &[&str] = &["eth", "eno", "enp", "ens", "enx", "em"];
    const VIRTUAL: &[&str] = &[
        "bridge", "awdl", "llw", "utun", "tun", "tap", "docker", "veth", "br-", "virbr",
    ];
    if WIFI.iter().any(|p| name.starts_with(p)) {
        return IfaceKind::Wifi;
    }
    if CABLE.iter().any(|p| name.starts_with(p)) {
        return IfaceKind::Cable;
    }
    if VIRTUAL.iter().any(|p| name.starts_with(p)) {
        return IfaceKind::Virtual;
    }
    IfaceKind::Other
}

/// MTU as the kernel reports it; `None` where the platform offers no
/// cheap way to ask.
#[cfg(target_os = "linux")]
fn device_mtu(device: &str) -> Option<u32> {
    std::fs::read_to_string(format!("/sys/class/net/{}/mtu", device))
        .ok()
        .and_then(|text| text.trim().parse().ok())
}

#[cfg(not(target_os = "linux"))]
fn device_mtu(_device: &str) -> Option<u32> {
    None
}
