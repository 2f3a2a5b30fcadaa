//! RFC1928 SOCKS Protocol Version 5 raw message types.
//!
//! Each structure corresponds to a SOCKS5 packet layout on the wire;
//! `from_model` / `into_model` bridge to the domain types. Decoding a
//! byte with no assigned meaning yields [`UnknownCode`].
use std::convert::TryFrom;
use std::fmt;
pub use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use derive_more::Display;

use crate::model;
use crate::model::ErrorKind;

pub const RESERVED: u8 = 0x00;

/// Version of socks
pub use model::ProtocolVersion;

/// A wire byte outside the alphabet of the field it was read for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(fmt = "unknown {} code: {:#04x}", field, value)]
pub struct UnknownCode {
    field: &'static str,
    value: u8,
}

impl UnknownCode {
    fn new(field: &'static str, value: u8) -> Self {
        Self { field, value }
    }
}

impl std::error::Error for UnknownCode {}

/// Section 6. Replies > Reply field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResponseCode {
    Success = 0x00,
    Failure = 0x01,
    RuleFailure = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddrTypeNotSupported = 0x08,
}

impl ResponseCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_result(res: model::ConnectResult) -> Self {
        use model::ConnectError::*;
        match res {
            Ok(()) => ResponseCode::Success,
            Err(ServerFailure) => ResponseCode::Failure,
            Err(ConnectionNotAllowed) => ResponseCode::RuleFailure,
            Err(NetworkUnreachable) => ResponseCode::NetworkUnreachable,
            Err(HostUnreachable) => ResponseCode::HostUnreachable,
            Err(ConnectionRefused) => ResponseCode::ConnectionRefused,
            Err(TtlExpired) => ResponseCode::TtlExpired,
            Err(CommandNotSupported) => ResponseCode::CommandNotSupported,
            Err(AddrTypeNotSupported) => ResponseCode::AddrTypeNotSupported,
        }
    }

    pub fn into_result(self) -> model::ConnectResult {
        use model::ConnectError as CErr;
        use ResponseCode::*;
        match self {
            Success => Ok(()),
            Failure => Err(CErr::ServerFailure),
            RuleFailure => Err(CErr::ConnectionNotAllowed),
            NetworkUnreachable => Err(CErr::NetworkUnreachable),
            HostUnreachable => Err(CErr::HostUnreachable),
            ConnectionRefused => Err(CErr::ConnectionRefused),
            TtlExpired => Err(CErr::TtlExpired),
            CommandNotSupported => Err(CErr::CommandNotSupported),
            AddrTypeNotSupported => Err(CErr::AddrTypeNotSupported),
        }
    }

    /// RFC 1928 reply phrase
    fn phrase(self) -> &'static str {
        use ResponseCode::*;
        match self {
            Success => "succeeded",
            Failure => "general SOCKS server failure",
            RuleFailure => "connection not allowed by ruleset",
            NetworkUnreachable => "Network unreachable",
            HostUnreachable => "Host unreachable",
            ConnectionRefused => "Connection refused",
            TtlExpired => "TTL expired",
            CommandNotSupported => "Command not supported",
            AddrTypeNotSupported => "Address type not supported",
        }
    }
}

impl TryFrom<u8> for ResponseCode {
    type Error = UnknownCode;
    fn try_from(n: u8) -> Result<ResponseCode, Self::Error> {
        use ResponseCode::*;
        Ok(match n {
            0 => Success,
            1 => Failure,
            2 => RuleFailure,
            3 => NetworkUnreachable,
            4 => HostUnreachable,
            5 => ConnectionRefused,
            6 => TtlExpired,
            7 => CommandNotSupported,
            8 => AddrTypeNotSupported,
            n => return Err(UnknownCode::new("reply", n)),
        })
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.phrase())
    }
}

/// Client Authentication Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthMethods {
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

impl AuthMethods {
    pub fn code(self) -> u8 {
        use AuthMethods::*;
        match self {
            NoAuth => 0x00,
            GssApi => 0x01,
            UserPass => 0x02,
            IANAMethod(c) => c,
            Private(c) => c,
            NoMethods => 0xff,
        }
    }
}

// every method byte has a meaning, so this decode cannot fail
impl From<u8> for AuthMethods {
    fn from(code: u8) -> Self {
        use AuthMethods::*;
        match code {
            0x00 => NoAuth,
            0x01 => GssApi,
            0x02 => UserPass,
            0x03..=0x7F => IANAMethod(code),
            0x80..=0xFE => Private(code),
            0xFF => NoMethods,
        }
    }
}

impl From<AuthMethods> for model::Method {
    fn from(method: AuthMethods) -> Self {
        use model::Method::*;
        match method {
            AuthMethods::NoAuth => NoAuth,
            AuthMethods::GssApi => GssApi,
            AuthMethods::UserPass => UserPass,
            AuthMethods::IANAMethod(c) => IANAMethod(c),
            AuthMethods::Private(c) => Private(c),
            AuthMethods::NoMethods => NoMethods,
        }
    }
}

impl From<model::Method> for AuthMethods {
    fn from(method: model::Method) -> Self {
        use AuthMethods::*;
        match method {
            model::Method::NoAuth => NoAuth,
            model::Method::GssApi => GssApi,
            model::Method::UserPass => UserPass,
            model::Method::IANAMethod(c) => IANAMethod(c),
            model::Method::Private(c) => Private(c),
            model::Method::NoMethods => NoMethods,
        }
    }
}

/// ATYP
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum AddrType {
    #[display(fmt = "ipv4")]
    V4 = 0x01,
    #[display(fmt = "domain")]
    Domain = 0x03,
    #[display(fmt = "ipv6")]
    V6 = 0x04,
}

impl TryFrom<u8> for AddrType {
    type Error = UnknownCode;
    fn try_from(n: u8) -> Result<AddrType, Self::Error> {
        match n {
            1 => Ok(AddrType::V4),
            3 => Ok(AddrType::Domain),
            4 => Ok(AddrType::V6),
            n => Err(UnknownCode::new("address type", n)),
        }
    }
}

/// SOCKS5 CMD Type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SockCommand {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

impl TryFrom<u8> for SockCommand {
    type Error = UnknownCode;
    fn try_from(n: u8) -> Result<SockCommand, Self::Error> {
        match n {
            1 => Ok(SockCommand::Connect),
            2 => Ok(SockCommand::Bind),
            3 => Ok(SockCommand::UdpAssociate),
            n => Err(UnknownCode::new("command", n)),
        }
    }
}

impl From<SockCommand> for model::Command {
    fn from(cmd: SockCommand) -> Self {
        use SockCommand::*;
        match cmd {
            Connect => model::Command::Connect,
            Bind => model::Command::Bind,
            UdpAssociate => model::Command::UdpAssociate,
        }
    }
}

impl From<model::Command> for SockCommand {
    fn from(cmd: model::Command) -> Self {
        use SockCommand::*;
        match cmd {
            model::Command::Connect => Connect,
            model::Command::Bind => Bind,
            model::Command::UdpAssociate => UdpAssociate,
        }
    }
}

/// address payload as it appears after the ATYP byte
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Addr {
    IpAddr(IpAddr),
    Domain(Vec<u8>),
}

/// Split a model address into its wire triple.
fn explode(addr: model::Address) -> (AddrType, Addr, u16) {
    match addr {
        model::Address::IpAddr(ip @ IpAddr::V4(_), port) => (AddrType::V4, Addr::IpAddr(ip), port),
        model::Address::IpAddr(ip @ IpAddr::V6(_), port) => (AddrType::V6, Addr::IpAddr(ip), port),
        model::Address::Domain(domain, port) => {
            (AddrType::Domain, Addr::Domain(domain.into_bytes()), port)
        }
    }
}

/// Reassemble a wire triple. The ATYP byte must agree with the address
/// payload that was read for it.
fn assemble(atyp: AddrType, addr: Addr, port: u16) -> Result<model::Address, model::Error> {
    match (atyp, addr) {
        (AddrType::V4, Addr::IpAddr(ip @ IpAddr::V4(_)))
        | (AddrType::V6, Addr::IpAddr(ip @ IpAddr::V6(_))) => Ok(model::Address::IpAddr(ip, port)),
        (AddrType::Domain, Addr::Domain(bytes)) => Ok(model::Address::Domain(
            String::from_utf8_lossy(&bytes).to_string(),
            port,
        )),
        (atyp, addr) => Err(ErrorKind::message_fmt(format_args!(
            "address payload does not fit atyp {}: {:?}",
            atyp, addr
        ))
        .into()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MethodCandidates {
    pub ver: ProtocolVersion,
    pub methods: Vec<AuthMethods>,
}

impl MethodCandidates {
    pub fn from_model(candidates: model::MethodCandidates) -> Self {
        MethodCandidates {
            ver: candidates.version,
            methods: candidates.method.into_iter().map(Into::into).collect(),
        }
    }

    pub fn into_model(self) -> model::MethodCandidates {
        model::MethodCandidates {
            version: self.ver,
            method: self.methods.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MethodSelection {
    pub ver: ProtocolVersion,
    pub method: AuthMethods,
}

impl MethodSelection {
    pub fn from_model(select: model::MethodSelection) -> Self {
        MethodSelection {
            ver: select.version,
            method: select.method.into(),
        }
    }

    pub fn into_model(self) -> model::MethodSelection {
        model::MethodSelection {
            version: self.ver,
            method: self.method.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectRequest {
    pub ver: ProtocolVersion,
    pub cmd: SockCommand,
    pub rsv: u8,
    pub atyp: AddrType,
    pub dst_addr: Addr,
    pub dst_port: u16,
}

impl ConnectRequest {
    pub fn from_model(req: model::ConnectRequest) -> Self {
        let (atyp, dst_addr, dst_port) = explode(req.connect_to);
        ConnectRequest {
            ver: req.version,
            cmd: req.command.into(),
            rsv: RESERVED,
            atyp,
            dst_addr,
            dst_port,
        }
    }

    pub fn into_model(self) -> Result<model::ConnectRequest, model::Error> {
        Ok(model::ConnectRequest {
            version: self.ver,
            command: self.cmd.into(),
            connect_to: assemble(self.atyp, self.dst_addr, self.dst_port)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectReply {
    pub ver: ProtocolVersion,
    pub rep: ResponseCode,
    pub rsv: u8,
    pub atyp: AddrType,
    pub bnd_addr: Addr,
    pub bnd_port: u16,
}

impl ConnectReply {
    pub fn from_model(rep: model::ConnectReply) -> Self {
        let (atyp, bnd_addr, bnd_port) = explode(rep.bind_addr);
        ConnectReply {
            ver: rep.version,
            rep: ResponseCode::from_result(rep.connect_result),
            rsv: RESERVED,
            atyp,
            bnd_addr,
            bnd_port,
        }
    }

    pub fn into_model(self) -> Result<model::ConnectReply, model::Error> {
        Ok(model::ConnectReply {
            version: self.ver,
            connect_result: self.rep.into_result(),
            bind_addr: assemble(self.atyp, self.bnd_addr, self.bnd_port)?,
        })
    }
}
