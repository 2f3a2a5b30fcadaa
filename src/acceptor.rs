use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{
    mpsc::{self, Receiver},
    Arc, Mutex,
};
use std::time::Duration;

use failure::Fail;
use log::*;

use crate::byte_stream::ByteStream;
use crate::model::{Error, ErrorKind};
use crate::tcp_listener_ext::*;

#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    /// deadline set on accepted sockets for the handshake states
    rw_timeout: Option<Duration>,
    /// receive termination message
    rx: Arc<Mutex<Receiver<()>>>,
    /// timeout for accept
    accept_timeout: Option<Duration>,
}

impl TcpAcceptor {
    fn new(
        listener: TcpListener,
        rw_timeout: Option<Duration>,
        rx: Arc<Mutex<Receiver<()>>>,
        accept_timeout: Option<Duration>,
    ) -> Self {
        Self {
            listener,
            rw_timeout,
            rx,
            accept_timeout,
        }
    }

    fn accept_timeout(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener
            .accept_timeout(self.accept_timeout)
            .and_then(|(tcp, addr)| {
                tcp.set_read_timeout(self.rw_timeout)?;
                tcp.set_write_timeout(self.rw_timeout)?;
                Ok((tcp, addr))
            })
    }
}

fn check_message(rx: &Arc<Mutex<Receiver<()>>>) -> Result<bool, Error> {
    use mpsc::TryRecvError;
    match rx.lock()?.try_recv() {
        Ok(()) => Ok(true),
        Err(TryRecvError::Empty) => Ok(false),
        Err(TryRecvError::Disconnected) => Err(ErrorKind::disconnected("acceptor").into()),
    }
}

macro_rules! check_done {
    ($rx:expr) => {
        match check_message($rx) {
            Ok(true) => return None,
            Ok(false) => {}
            Err(_) => return None,
        }
    };
}

impl Iterator for TcpAcceptor {
    type Item = (TcpStream, SocketAddr);
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            check_done!(&self.rx);
            match self.accept_timeout() {
                Ok(x) => return Some(x),
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {}
                Err(err) => {
                    // resource exhaustion and transient errors; keep accepting
                    error!("accept error: {}", err);
                    trace!("accept error: {:?}", err);
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }
}

pub trait Binder {
    type Stream: ByteStream + 'static;
    type Iter: Iterator<Item = (Self::Stream, SocketAddr)> + Send + 'static;
    fn bind(&self, addr: SocketAddr) -> Result<Self::Iter, Error>;
}

pub struct TcpBinder {
    rw_timeout: Option<Duration>,
    /// receiver for Acceptor termination message
    rx: Arc<Mutex<Receiver<()>>>,
    accept_timeout: Option<Duration>,
}

impl TcpBinder {
    pub fn new(
        rw_timeout: Option<Duration>,
        rx: Arc<Mutex<Receiver<()>>>,
        accept_timeout: Option<Duration>,
    ) -> Self {
        Self {
            rw_timeout,
            rx,
            accept_timeout,
        }
    }
}

impl Binder for TcpBinder {
    type Stream = TcpStream;
    type Iter = TcpAcceptor;
    fn bind(&self, addr: SocketAddr) -> Result<Self::Iter, Error> {
        // any failure to stand the listener up is fatal for the caller
        let listener = listen(&addr)
            .map_err(|err| -> Error { err.context(ErrorKind::ListenFailed { addr }).into() })?;

        Ok(TcpAcceptor::new(
            listener,
            self.rw_timeout,
            self.rx.clone(),
            self.accept_timeout,
        ))
    }
}

/// reuse-addr listener with an explicit backlog
fn listen(addr: &SocketAddr) -> io::Result<TcpListener> {
    let tcp = if addr.is_ipv4() {
        net2::TcpBuilder::new_v4()
    } else {
        net2::TcpBuilder::new_v6()
    }?;
    tcp.reuse_address(true)?;
    tcp.bind(addr)?;
    // `backlog` is passed to `listen(2)` as is. If it is too small,
    // clients may fail to `connect(2)` under bursts of connections.
    tcp.listen(256)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn binds_and_accept_times_out() {
        let (_tx, rx) = mpsc::channel();
        let binder = TcpBinder::new(
            None,
            Arc::new(Mutex::new(rx)),
            Some(Duration::from_millis(50)),
        );
        let acceptor = binder.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let err = acceptor.accept_timeout().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn terminated_acceptor_yields_none() {
        let (tx, rx) = mpsc::channel();
        let binder = TcpBinder::new(
            None,
            Arc::new(Mutex::new(rx)),
            Some(Duration::from_millis(50)),
        );
        let mut acceptor = binder.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        tx.send(()).unwrap();
        assert!(acceptor.next().is_none());
    }

    #[test]
    fn bind_conflict_is_listen_failed() {
        let (_tx, rx) = mpsc::channel();
        let rx = Arc::new(Mutex::new(rx));
        let binder = TcpBinder::new(None, rx.clone(), None);
        let first = binder.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let taken = first.listener.local_addr().unwrap();
        let err = TcpBinder::new(None, rx, None).bind(taken).unwrap_err();
        match err.kind() {
            ErrorKind::ListenFailed { addr } => assert_eq!(addr, &taken),
            other => panic!("unexpected error kind: {:?}", other),
        }
    }
}
