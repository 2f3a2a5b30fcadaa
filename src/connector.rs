use std::net::SocketAddr;

use crate::byte_stream::ByteStream;
use crate::model::{Address, Error, Label};

/// Seam between the front-ends and the upstream dial.
///
/// Returns the established stream together with its local bind address;
/// the SOCKS success reply carries that address back to the client.
pub trait Connector: Send {
    type Stream: ByteStream + 'static;
    fn connect(&self, addr: &Address, label: &Label) -> Result<(Self::Stream, SocketAddr), Error>;
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::byte_stream::test::BufferStream;
    use crate::model::{ConnectError, ErrorKind, IpAddr};
    use std::collections::BTreeMap;
    use std::iter::FromIterator;
    use std::sync::{Arc, Mutex};

    /// Hands out canned streams per address and records which label each
    /// dial was routed through.
    #[derive(Debug, Clone)]
    pub struct BufferConnector<S> {
        pub strms: BTreeMap<Address, Result<S, ConnectError>>,
        pub dialed_labels: Arc<Mutex<Vec<Label>>>,
    }

    impl<S> FromIterator<(Address, Result<S, ConnectError>)> for BufferConnector<S> {
        fn from_iter<T>(iter: T) -> Self
        where
            T: IntoIterator<Item = (Address, Result<S, ConnectError>)>,
        {
            Self {
                strms: iter.into_iter().collect(),
                dialed_labels: Arc::new(Mutex::new(vec![])),
            }
        }
    }

    impl<S> BufferConnector<S> {
        pub fn stream(&self, addr: &Address) -> &S {
            self.strms[addr].as_ref().unwrap()
        }

        pub fn last_label(&self) -> Option<Label> {
            self.dialed_labels.lock().unwrap().last().cloned()
        }
    }

    /// fabricated local bind address, family following the target
    pub fn local_addr_for(addr: &Address) -> SocketAddr {
        match addr {
            Address::IpAddr(IpAddr::V6(_), _) => "[2001:db8::100]:40000".parse().unwrap(),
            _ => "192.168.1.1:40000".parse().unwrap(),
        }
    }

    impl Connector for BufferConnector<BufferStream> {
        type Stream = BufferStream;
        fn connect(
            &self,
            addr: &Address,
            label: &Label,
        ) -> Result<(Self::Stream, SocketAddr), Error> {
            println!("connect: {:?} via {}", addr, label);
            self.dialed_labels.lock().unwrap().push(label.clone());
            match &self.strms[addr] {
                Ok(strm) => Ok((strm.clone(), local_addr_for(addr))),
                Err(ConnectError::HostUnreachable) => {
                    Err(ErrorKind::host_unreachable(addr.host(), addr.port()).into())
                }
                Err(_) => Err(ErrorKind::upstream_dial_failed(addr.clone(), label).into()),
            }
        }
    }
}
