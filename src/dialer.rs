//! Interface-bound upstream dials.
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use failure::Fail;
use log::*;
use socket2::{Domain, Protocol, Socket, Type};

use crate::connector::Connector;
use crate::model::{Address, Error, ErrorKind, Label};
use crate::registry::IfaceRegistry;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens upstream TCP connections with the local socket bound to the
/// address of the interface a routing decision selected.
#[derive(Clone)]
pub struct InterfaceDialer {
    registry: Arc<IfaceRegistry>,
    timeout: Duration,
}

impl InterfaceDialer {
    pub fn new(registry: Arc<IfaceRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }
}

impl Connector for InterfaceDialer {
    type Stream = TcpStream;

    fn connect(&self, addr: &Address, label: &Label) -> Result<(TcpStream, SocketAddr), Error> {
        let local = match self.registry.local_addr_for_target(label, &addr.host()) {
            Ok(local) => Some(local),
            // availability beats the routing decision: a yanked cable must
            // not take the user's requests down with it
            Err(err) if err.kind().is_interface_error() => {
                warn!(
                    "interface unavailable, falling back to default route: {}: {}",
                    label, err
                );
                None
            }
            Err(err) => return Err(err),
        };
        debug!("dial: {} via {} (local bind {:?})", addr, label, local);

        let strm = dial_bound(addr, local, self.timeout).map_err(|err| -> Error {
            err.context(ErrorKind::upstream_dial_failed(addr.clone(), label))
                .into()
        })?;
        let local_addr = strm.local_addr()?;
        Ok((strm, local_addr))
    }
}

/// Resolve (when the target is a domain) and connect with the given local
/// bind. Resolution happens before the connect so the address records can
/// be filtered to the bind family; a domain resolving only to the other
/// family therefore fails here instead of producing EINVAL mid-connect.
fn dial_bound(
    addr: &Address,
    local: Option<SocketAddr>,
    timeout: Duration,
) -> io::Result<TcpStream> {
    let mut candidates: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
    if let Some(local) = &local {
        candidates.retain(|peer| peer.is_ipv4() == local.is_ipv4());
    }

    let mut last_err = None;
    for peer in candidates {
        match connect_bound(peer, local, timeout) {
            Ok(strm) => return Ok(strm),
            Err(err) => {
                trace!("connect {}: {}", peer, err);
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no usable address records for {}", addr),
        )
    }))
}

fn connect_bound(
    peer: SocketAddr,
    local: Option<SocketAddr>,
    timeout: Duration,
) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(peer), Type::STREAM, Some(Protocol::TCP))?;
    if let Some(local) = local {
        socket.bind(&local.into())?;
    }
    socket.connect_timeout(&peer.into(), timeout)?;
    socket.set_nonblocking(false)?;
    Ok(socket.into())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Label;
    use std::collections::HashMap;
    use std::net::TcpListener;

    fn listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[test]
    fn bound_connect_uses_local_address() {
        let (_listener, peer) = listener();
        let local: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let strm = connect_bound(peer, Some(local), DEFAULT_DIAL_TIMEOUT).unwrap();
        assert_eq!(strm.local_addr().unwrap().ip(), local.ip());
    }

    #[test]
    fn family_mismatch_fails_before_connect() {
        let addr = Address::IpAddr("2001:db8::1".parse().unwrap(), 443);
        let local: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let err = dial_bound(&addr, Some(local), DEFAULT_DIAL_TIMEOUT).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrNotAvailable);
    }

    #[test]
    fn unbound_label_degrades_to_default_route() {
        let (_listener, peer) = listener();
        // empty registry: every label lookup is an interface error
        let dialer = InterfaceDialer::new(
            Arc::new(IfaceRegistry::new(HashMap::new())),
            DEFAULT_DIAL_TIMEOUT,
        );
        let (strm, local_addr) = dialer
            .connect(&Address::IpAddr(peer.ip(), peer.port()), &Label::cable())
            .unwrap();
        assert_eq!(strm.peer_addr().unwrap(), peer);
        assert_eq!(local_addr, strm.local_addr().unwrap());
    }

    #[test]
    fn refused_connect_is_upstream_dial_failed() {
        // bind then drop: nothing is listening on the port afterwards
        let (listener, peer) = listener();
        drop(listener);
        let dialer = InterfaceDialer::new(
            Arc::new(IfaceRegistry::new(HashMap::new())),
            DEFAULT_DIAL_TIMEOUT,
        );
        let err = dialer
            .connect(&Address::IpAddr(peer.ip(), peer.port()), &Label::wifi())
            .unwrap_err();
        match err.kind() {
            ErrorKind::UpstreamDialFailed { label, .. } => assert_eq!(label, &Label::wifi()),
            other => panic!("unexpected error kind: {:?}", other),
        }
    }
}
