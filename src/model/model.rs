//! SOCKS5 message types exchanged between client and proxy, and the
//! routing vocabulary shared by both front-ends.
//!
//! ```text
//! client            proxy            service
//!   |                 |                 |
//!   .                 .                 .
//!   .                 .                 .
//!   |                 |                 |
//!   |---------------->|                 |
//!   |MethodCandidates |                 |
//!   |                 |                 |
//!   |<----------------|                 |
//!   |  MethodSelection|                 |
//!   |                 |                 |
//!   |---------------->|                 |
//!   |ConnectRequest   |                 |
//!   |                 |                 |
//!   |<----------------|                 |
//!   |     ConnectReply|                 |
//!   |                 |                 |
//!   |                 |                 |
//!   .                 .                 .
//!   .                 .                 .
//!   | - - - - - - - ->| - - - - - - - ->|
//!   |            [[ Relay ]]            |
//!   |<- - - - - - - - |< - - - - - - - -|
//!   .                 .                 .
//!   .                 .                 .
//!   |                 |                 |
//! ```
//!
use std::fmt;
use std::net::ToSocketAddrs;
pub use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Into, From, Display)]
pub struct ProtocolVersion(u8);

/// Authentication Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum Method {
    /// No Authentication
    NoAuth,
    /// GSSAPI
    GssApi,
    /// Authenticate with a username / password
    UserPass,
    /// IANA assigned method
    IANAMethod(u8),
    /// Reserved for private method
    Private(u8),
    /// No acceptable method
    NoMethods,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MethodCandidates {
    pub version: ProtocolVersion,
    pub method: Vec<Method>,
}

impl MethodCandidates {
    pub fn new(method: &[Method]) -> Self {
        Self {
            version: DEFAULT_PROTOCOL_VERSION,
            method: method.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MethodSelection {
    pub version: ProtocolVersion,
    pub method: Method,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
}

/// ip address and port
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Address {
    IpAddr(IpAddr, u16),
    Domain(String, u16),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Address::*;
        match self {
            IpAddr(addr, port) => write!(f, "{}:{}", addr, port),
            Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

impl Address {
    pub fn port(&self) -> u16 {
        match self {
            Address::IpAddr(_, port) => *port,
            Address::Domain(_, port) => *port,
        }
    }

    /// host part without the port, in the form the routing engine consumes
    pub fn host(&self) -> String {
        match self {
            Address::IpAddr(addr, _) => addr.to_string(),
            Address::Domain(host, _) => host.clone(),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::IpAddr(addr.ip(), addr.port())
    }
}

impl From<SocketAddrV4> for Address {
    fn from(addr: SocketAddrV4) -> Self {
        Address::IpAddr((*addr.ip()).into(), addr.port())
    }
}

impl From<SocketAddrV6> for Address {
    fn from(addr: SocketAddrV6) -> Self {
        Address::IpAddr((*addr.ip()).into(), addr.port())
    }
}

impl FromStr for Address {
    type Err = std::net::AddrParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: SocketAddr = s.parse()?;
        Ok(addr.into())
    }
}

impl ToSocketAddrs for Address {
    type Iter = std::vec::IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        use Address::*;
        match self {
            IpAddr(ipaddr, port) => Ok(vec![SocketAddr::new(*ipaddr, *port)].into_iter()),
            Domain(domain, port) => Ok((domain.as_str(), *port).to_socket_addrs()?),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectRequest {
    pub version: ProtocolVersion,
    pub command: Command,
    pub connect_to: Address,
}

impl ConnectRequest {
    pub fn connect_to<A>(addr: A) -> Self
    where
        Address: From<A>,
    {
        Self {
            version: DEFAULT_PROTOCOL_VERSION,
            command: Command::Connect,
            connect_to: addr.into(),
        }
    }

    pub fn bind<A>(addr: A) -> Self
    where
        Address: From<A>,
    {
        Self {
            version: DEFAULT_PROTOCOL_VERSION,
            command: Command::Bind,
            connect_to: addr.into(),
        }
    }

    pub fn udp_associate<A>(addr: A) -> Self
    where
        Address: From<A>,
    {
        Self {
            version: DEFAULT_PROTOCOL_VERSION,
            command: Command::UdpAssociate,
            connect_to: addr.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum ConnectError {
    /// general server failure
    ServerFailure,
    ConnectionNotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddrTypeNotSupported,
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

pub type ConnectResult = std::result::Result<(), ConnectError>;

/// Reply to a `ConnectRequest`.
///
/// On success `bind_addr` carries the local address of the upstream
/// connection; every error reply carries the all-zero address instead.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectReply {
    pub version: ProtocolVersion,
    pub connect_result: ConnectResult,
    pub bind_addr: Address,
}

impl ConnectReply {
    pub fn unbound() -> Address {
        Address::IpAddr(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L4Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for L4Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            L4Protocol::Tcp => write!(f, "Tcp"),
            L4Protocol::Udp => write!(f, "Udp"),
        }
    }
}

/// Symbolic interface name the routing rules speak in.
///
/// Bound to exactly one device at a time by the registry. `cable` and
/// `wifi` are the labels the configuration knows today.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn cable() -> Self {
        Label("cable".to_owned())
    }

    pub fn wifi() -> Self {
        Label("wifi".to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Label {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Label(s.to_owned()))
    }
}

impl<'a> From<&'a str> for Label {
    fn from(s: &'a str) -> Self {
        Label(s.to_owned())
    }
}
