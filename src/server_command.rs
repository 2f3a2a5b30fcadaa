//! Server control commands.
use std::fmt;
use std::net::SocketAddr;

use crate::config::Config;
use crate::session::SessionId;

/// Which front-end accepted a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Socks5,
    Http,
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Proto::Socks5 => write!(f, "socks5"),
            Proto::Http => write!(f, "http"),
        }
    }
}

pub enum ServerCommand<T> {
    /// terminate
    Terminate,
    /// accepted stream, client address and accepting front-end
    Connect(T, SocketAddr, Proto),
    Disconnect(SessionId),
    /// the configuration on disk changed
    Reload(Config),
}

impl<T> fmt::Debug for ServerCommand<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ServerCommand::*;
        match self {
            Terminate => write!(f, "Terminate"),
            Connect(_, addr, proto) => write!(f, "Connect(_, {}, {})", addr, proto),
            Disconnect(id) => write!(f, "Disconnect({})", id),
            Reload(_) => write!(f, "Reload(_)"),
        }
    }
}
