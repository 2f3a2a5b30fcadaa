use std::fmt;
use std::fmt::Display;

use failure::{Backtrace, Context, Fail};

use crate::model;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Fail, Debug)]
pub enum ErrorKind {
    #[fail(display = "io error")]
    Io,
    /// the configuration file could not be read or parsed
    #[fail(display = "config parse error")]
    ConfigParse,
    /// the configuration parsed but its contents are unusable
    #[fail(display = "config validation error")]
    ConfigValidate,
    /// a front-end listener could not be bound
    #[fail(display = "listen failed")]
    ListenFailed,
    #[fail(display = "not supported error")]
    NotSupported,
    #[fail(display = "unknown error")]
    Unknown,
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

impl From<model::Error> for Error {
    fn from(err: model::Error) -> Self {
        use model::ErrorKind as K;
        let ctx = match err.kind() {
            K::Io => err.context(ErrorKind::Io),
            K::Poisoned(_) => err.context(ErrorKind::Io),
            K::Disconnected { .. } => err.context(ErrorKind::Io),
            K::MessageFormat { .. } => err.context(ErrorKind::Unknown),
            K::NoAcceptableMethod => err.context(ErrorKind::NotSupported),
            K::CommandNotSupported { .. } => err.context(ErrorKind::NotSupported),
            K::AddrTypeNotSupported { .. } => err.context(ErrorKind::NotSupported),
            K::HostUnreachable { .. } => err.context(ErrorKind::Io),
            K::DomainNotResolved { .. } => err.context(ErrorKind::Io),
            K::ListenFailed { .. } => err.context(ErrorKind::ListenFailed),
            K::InvalidInterfaceSpec => err.context(ErrorKind::ConfigValidate),
            K::HardwarePortNotFound { .. } => err.context(ErrorKind::ConfigValidate),
            K::InterfaceUnavailable { .. } => err.context(ErrorKind::Io),
            K::InterfaceNoIpv6 { .. } => err.context(ErrorKind::Io),
            K::InterfaceIpv6Unusable { .. } => err.context(ErrorKind::Io),
            K::UpstreamDialFailed { .. } => err.context(ErrorKind::Io),
        };
        Error { inner: ctx }
    }
}
