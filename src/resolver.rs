//! Interface specification resolution.
//!
//! A spec names either a device (`en0`, `eth1`) or a human-facing
//! hardware port (`"Wi-Fi"`). Hardware ports are resolved through the
//! host's `networksetup -listallhardwareports` listing; the mapping is
//! cached and refreshed once on a miss before giving up.
use std::collections::HashMap;
use std::process::Command;
use std::sync::RwLock;

use log::*;
use serde::{Deserialize, Serialize};

use crate::model::{Error, ErrorKind};

/// User-facing way to pick an interface. Exactly one field is set in a
/// valid spec; `validate` enforces it at configuration load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_port: Option<String>,
}

impl InterfaceSpec {
    pub fn device<S: Into<String>>(name: S) -> Self {
        Self {
            device: Some(name.into()),
            hardware_port: None,
        }
    }

    pub fn hardware_port<S: Into<String>>(name: S) -> Self {
        Self {
            device: None,
            hardware_port: Some(name.into()),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        match (&self.device, &self.hardware_port) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(ErrorKind::InvalidInterfaceSpec.into()),
        }
    }
}

pub struct IfaceResolver {
    /// hardware port -> device name; single writer (refresh), many readers
    port_to_device: RwLock<HashMap<String, String>>,
}

impl IfaceResolver {
    pub fn new() -> Self {
        Self {
            port_to_device: RwLock::new(HashMap::new()),
        }
    }

    /// Translate a spec into a concrete device name.
    pub fn resolve(&self, spec: &InterfaceSpec) -> Result<String, Error> {
        if let Some(device) = &spec.device {
            return Ok(device.clone());
        }
        if let Some(port) = &spec.hardware_port {
            return self.resolve_hardware_port(port);
        }
        Err(ErrorKind::InvalidInterfaceSpec.into())
    }

    fn resolve_hardware_port(&self, port: &str) -> Result<String, Error> {
        if let Some(device) = self.lookup(port) {
            return Ok(device);
        }
        // cache miss: requery the host once before failing
        self.refresh()?;
        self.lookup(port).ok_or_else(|| {
            ErrorKind::HardwarePortNotFound {
                port: port.to_owned(),
            }
            .into()
        })
    }

    fn lookup(&self, port: &str) -> Option<String> {
        self.port_to_device
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(port)
            .cloned()
    }

    fn refresh(&self) -> Result<(), Error> {
        let output = Command::new("networksetup")
            .arg("-listallhardwareports")
            .output()?;
        let mappings = parse_hardware_ports(&String::from_utf8_lossy(&output.stdout));
        debug!("hardware port mappings: {:?}", mappings);
        let mut cache = self
            .port_to_device
            .write()
            .unwrap_or_else(|err| err.into_inner());
        *cache = mappings;
        Ok(())
    }
}

/// Parse `networksetup -listallhardwareports` output: successive
/// `Hardware Port: X` / `Device: Y` stanzas separated by blank lines.
///
/// ```text
/// Hardware Port: Wi-Fi
/// Device: en0
/// Ethernet Address: bc:d0:74:1e:5b:f1
///
/// Hardware Port: USB 10/100/1000 LAN
/// Device: en7
/// Ethernet Address: 00:14:3d:28:0b:ad
/// ```
pub fn parse_hardware_ports(text: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let mut current_port: Option<&str> = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(port) = strip_field(line, "Hardware Port:") {
            current_port = Some(port);
        } else if let Some(device) = strip_field(line, "Device:") {
            if let Some(port) = current_port {
                if !device.is_empty() {
                    result.insert(port.to_owned(), device.to_owned());
                }
            }
        }
    }
    result
}

fn strip_field<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    if line.starts_with(field) {
        Some(line[field.len()..].trim())
    } else {
        None
    }
}
