use std::fmt;
use std::fmt::Display;
use std::sync;

use failure::{Backtrace, Context, Fail};

use crate::model::*;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[fail(display = "io error")]
    Io,
    #[fail(display = "poisoned error: {}", _0)]
    Poisoned(String),
    #[fail(display = "disconnected channel error: {}", name)]
    Disconnected { name: String },
    #[fail(display = "message format error: {}", message)]
    MessageFormat { message: String },
    #[fail(display = "authentication error: no acceptable method")]
    NoAcceptableMethod,
    #[fail(display = "command not supported: {:?}", cmd)]
    CommandNotSupported { cmd: Command },
    #[fail(display = "address type not supported: {:#x}", atyp)]
    AddrTypeNotSupported { atyp: u8 },
    #[fail(display = "host unreachable: {}:{}", host, port)]
    HostUnreachable { host: String, port: u16 },
    #[fail(display = "name not resolved: {}:{}", domain, port)]
    DomainNotResolved { domain: String, port: u16 },
    /// a front-end listener could not be bound
    #[fail(display = "listen failed: {}", addr)]
    ListenFailed { addr: SocketAddr },
    /// interface spec names neither a device nor a hardware port
    #[fail(display = "invalid interface spec")]
    InvalidInterfaceSpec,
    #[fail(display = "hardware port not found: {:?}", port)]
    HardwarePortNotFound { port: String },
    /// no usable address on the interface bound to the label
    #[fail(display = "interface unavailable: {}", label)]
    InterfaceUnavailable { label: Label },
    #[fail(display = "interface has no ipv6 address: {}", device)]
    InterfaceNoIpv6 { device: String },
    /// only link-local ipv6 present; unusable for a global target
    #[fail(display = "interface ipv6 unusable: {}", device)]
    InterfaceIpv6Unusable { device: String },
    #[fail(display = "upstream dial failed: {} via {}", target, label)]
    UpstreamDialFailed { target: Address, label: Label },
}

impl ErrorKind {
    pub fn disconnected<S: Into<String>>(name: S) -> Self {
        ErrorKind::Disconnected { name: name.into() }
    }

    pub fn message_fmt(message: fmt::Arguments) -> Self {
        ErrorKind::MessageFormat {
            message: message.to_string(),
        }
    }

    pub fn command_not_supported(cmd: Command) -> Self {
        ErrorKind::CommandNotSupported { cmd }
    }

    pub fn addr_type_not_supported(atyp: u8) -> Self {
        ErrorKind::AddrTypeNotSupported { atyp }
    }

    pub fn host_unreachable<S: Into<String>>(host: S, port: u16) -> Self {
        ErrorKind::HostUnreachable {
            host: host.into(),
            port,
        }
    }

    pub fn interface_unavailable(label: &Label) -> Self {
        ErrorKind::InterfaceUnavailable {
            label: label.clone(),
        }
    }

    pub fn upstream_dial_failed(target: Address, label: &Label) -> Self {
        ErrorKind::UpstreamDialFailed {
            target,
            label: label.clone(),
        }
    }

    /// interface taxonomy: these degrade a dial to the OS default route
    /// instead of failing the client's request
    pub fn is_interface_error(&self) -> bool {
        use ErrorKind::*;
        matches!(
            self,
            InvalidInterfaceSpec
                | HardwarePortNotFound { .. }
                | InterfaceUnavailable { .. }
                | InterfaceNoIpv6 { .. }
                | InterfaceIpv6Unusable { .. }
        )
    }
}

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl Error {
    pub fn new(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }

    pub fn kind(&self) -> &ErrorKind {
        self.inner.get_context()
    }

    /// reply code carried back to the SOCKS client for this error
    pub fn cerr(&self) -> ConnectError {
        use ConnectError as CErr;
        use ErrorKind as K;
        match self.kind() {
            K::Io => CErr::ServerFailure,
            K::Poisoned(_) => CErr::ServerFailure,
            K::Disconnected { .. } => CErr::ServerFailure,
            K::MessageFormat { .. } => CErr::ServerFailure,
            K::NoAcceptableMethod => CErr::ConnectionNotAllowed,
            K::CommandNotSupported { .. } => CErr::CommandNotSupported,
            K::AddrTypeNotSupported { .. } => CErr::AddrTypeNotSupported,
            K::HostUnreachable { .. } => CErr::HostUnreachable,
            K::DomainNotResolved { .. } => CErr::NetworkUnreachable,
            K::ListenFailed { .. } => CErr::ServerFailure,
            K::InvalidInterfaceSpec => CErr::ServerFailure,
            K::HardwarePortNotFound { .. } => CErr::ServerFailure,
            K::InterfaceUnavailable { .. } => CErr::ServerFailure,
            K::InterfaceNoIpv6 { .. } => CErr::ServerFailure,
            K::InterfaceIpv6Unusable { .. } => CErr::ServerFailure,
            // deliberately coarser than refused/unreachable/ttl-expired
            K::UpstreamDialFailed { .. } => CErr::HostUnreachable,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error {
            inner: error.context(ErrorKind::Io),
        }
    }
}

impl<T: fmt::Debug> From<sync::PoisonError<T>> for Error {
    fn from(error: sync::PoisonError<T>) -> Self {
        ErrorKind::Poisoned(format!("{:?}", error)).into()
    }
}
