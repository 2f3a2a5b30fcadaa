//! On-disk configuration and its change watcher.
use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use failure::ResultExt;
use log::*;
use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};
use crate::model::RouteRule;
use crate::resolver::InterfaceSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub interfaces: InterfacesSection,
    pub routes: Vec<RouteRule>,
    pub logging: LoggingSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            interfaces: InterfacesSection::default(),
            routes: vec![],
            logging: LoggingSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub socks_addr: SocketAddr,
    pub http_addr: SocketAddr,
    /// deadline spanning a client's greeting and request, seconds
    pub handshake_timeout_secs: u64,
    /// upstream connect deadline, seconds
    pub dial_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            socks_addr: "127.0.0.1:1080".parse().expect("default socks addr"),
            http_addr: "127.0.0.1:8080".parse().expect("default http addr"),
            handshake_timeout_secs: 30,
            dial_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfacesSection {
    pub cable: InterfaceSpec,
    pub wifi: InterfaceSpec,
}

impl Default for InterfacesSection {
    fn default() -> Self {
        Self {
            cable: InterfaceSpec::device("en0"),
            wifi: InterfaceSpec::device("en1"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: LogLevel,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

impl Config {
    /// Load and check a configuration file.
    ///
    /// Failures keep their provenance: `ConfigParse` for a file that
    /// cannot be read or is not valid YAML, `ConfigValidate` for one
    /// that parsed but asks for something unusable. Callers decide the
    /// disposition; at startup the first degrades to built-in defaults
    /// while the second is fatal.
    pub fn with_file(path: &Path) -> Result<Self, Error> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse, without semantic checks.
    pub fn parse_file(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).context(ErrorKind::ConfigParse)?;
        let config = serde_yaml::from_reader(file).context(ErrorKind::ConfigParse)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.interfaces
            .cable
            .validate()
            .context(ErrorKind::ConfigValidate)?;
        self.interfaces
            .wifi
            .validate()
            .context(ErrorKind::ConfigValidate)?;
        for rule in &self.routes {
            if rule.matcher.ports.iter().any(|port| *port == 0) {
                warn!("rule {}: port 0 is not a valid port", rule.id);
                return Err(ErrorKind::ConfigValidate.into());
            }
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.server.handshake_timeout_secs))
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.server.dial_timeout_secs)
    }
}

/// Keeps the notify watcher (and its thread) alive.
pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
}

/// Watch the configuration file for changes; `on_change` receives every
/// successfully reloaded configuration, one call per edit.
///
/// The watch is on the parent directory, matched by file name, so the
/// atomic rename most editors save with still counts as a change.
pub fn watch<F>(path: &Path, on_change: F) -> Result<ConfigWatcher, Error>
where
    F: Fn(Config) + Send + 'static,
{
    let path: PathBuf = path.to_owned();
    let file_name = path
        .file_name()
        .ok_or(ErrorKind::ConfigParse)?
        .to_os_string();
    let dir = match path.parent() {
        Some(dir) if dir.as_os_str().is_empty() => Path::new("."),
        Some(dir) => dir,
        None => Path::new("."),
    }
    .to_owned();

    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        tx.send(res).ok();
    })
    .context(ErrorKind::Io)?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .context(ErrorKind::Io)?;

    thread::Builder::new()
        .name("config-watch".into())
        .spawn(move || {
            for res in rx.iter() {
                match res {
                    Ok(event) if is_relevant(&event, &file_name) => {}
                    Ok(_) => continue,
                    Err(err) => {
                        warn!("config watch error: {}", err);
                        continue;
                    }
                }
                // coalesce the event burst a single save produces
                thread::sleep(Duration::from_millis(100));
                while rx.try_recv().is_ok() {}

                info!("configuration file changed: {}", path.display());
                match Config::with_file(&path) {
                    Ok(config) => on_change(config),
                    Err(err) => warn!("configuration reload failed: {}", err),
                }
            }
        })?;

    Ok(ConfigWatcher { _watcher: watcher })
}

fn is_relevant(event: &notify::Event, file_name: &std::ffi::OsStr) -> bool {
    use notify::EventKind;
    let kind_matters = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_)
    );
    kind_matters
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Label;
    use std::path::Path;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server.socks_addr.port(), 1080);
        assert_eq!(config.server.http_addr.port(), 8080);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.routes.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_example_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("example.yml");
        let config = Config::with_file(&path).unwrap();

        assert_eq!(config.server.socks_addr.port(), 1080);
        assert_eq!(
            config.interfaces.wifi,
            InterfaceSpec::hardware_port("Wi-Fi")
        );
        assert_eq!(config.interfaces.cable, InterfaceSpec::device("en7"));
        assert_eq!(config.logging.level, LogLevel::Debug);

        assert!(config.routes.len() >= 2);
        let first = &config.routes[0];
        assert_eq!(first.interface, Label::wifi());
        assert!(first.matcher.matches("api.netflix.com", 443));
        let last = config.routes.last().unwrap();
        assert!(last.matcher.is_catch_all());
        assert!(last.enabled);
    }

    #[test]
    fn parse_and_validate_failures_are_distinguished() {
        let dir = std::env::temp_dir();

        let path = dir.join("switchyard-test-parse.yml");
        std::fs::write(&path, "routes: [not a rule").unwrap();
        let err = Config::with_file(&path).unwrap_err();
        match err.kind() {
            ErrorKind::ConfigParse => {}
            other => panic!("unexpected error kind: {:?}", other),
        }
        std::fs::remove_file(&path).ok();

        // missing file is a parse-level failure too
        let err = Config::with_file(&dir.join("switchyard-test-nonexistent.yml")).unwrap_err();
        match err.kind() {
            ErrorKind::ConfigParse => {}
            other => panic!("unexpected error kind: {:?}", other),
        }

        let path = dir.join("switchyard-test-validate.yml");
        std::fs::write(
            &path,
            "routes:\n  - id: bad\n    name: Bad\n    interface: cable\n    match:\n      ports: [0]\n",
        )
        .unwrap();
        let err = Config::with_file(&path).unwrap_err();
        match err.kind() {
            ErrorKind::ConfigValidate => {}
            other => panic!("unexpected error kind: {:?}", other),
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn zero_port_rule_is_rejected() {
        let text = r#"
routes:
  - id: bad
    name: Bad
    interface: cable
    match:
      ports: [0]
"#;
        let config: Config = serde_yaml::from_str(text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn two_field_interface_spec_is_rejected() {
        let text = r#"
interfaces:
  cable:
    device: en0
    hardware_port: Ethernet
"#;
        let config: Config = serde_yaml::from_str(text).unwrap();
        assert!(config.validate().is_err());
    }
}
