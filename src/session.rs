use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use log::*;

use crate::auth_service::AuthService;
use crate::byte_stream::ByteStream;
use crate::connector::Connector;
use crate::model::dao::*;
use crate::model::error::{Error, ErrorKind};
use crate::model::model::*;
use crate::relay::{self, RelayHandle};
use crate::router::Router;
use crate::rw_socks_stream::ReadWriteStream;
use crate::server_command::ServerCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

#[derive(Debug)]
pub struct SessionHandle {
    /// client address
    addr: SocketAddr,
    /// thread performing the handshake, then the relay
    handle: thread::JoinHandle<Result<RelayHandle, Error>>,
}

impl SessionHandle {
    pub fn new(addr: SocketAddr, handle: thread::JoinHandle<Result<RelayHandle, Error>>) -> Self {
        Self { addr, handle }
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn join(self) -> thread::Result<Result<(), Error>> {
        trace!("join session: {}", self.addr);
        match self.handle.join()? {
            Ok(relay) => relay.join(),
            Err(err) => Ok(Err(err)),
        }
    }
}

/// SOCKS5 connection state machine.
///
/// `AwaitGreeting -> AwaitRequest -> Relaying`; the acceptor arms a
/// deadline spanning the first two states and the session clears it on
/// the transition into `Relaying`.
#[derive(Debug)]
pub struct Session<D, A, S> {
    pub id: SessionId,
    pub version: ProtocolVersion,
    pub dst_connector: D,
    pub authorizer: A,
    pub router: Arc<Router>,
    /// Sends `Disconnect` to the main thread when the relay pair is done.
    /// Shared with the 2 relay halves.
    guard: Arc<Mutex<DisconnectGuard<S>>>,
}

impl<D, A, S> Session<D, A, S>
where
    D: Connector,
    A: AuthService,
    S: Send + 'static,
{
    pub fn new(
        id: SessionId,
        version: ProtocolVersion,
        dst_connector: D,
        authorizer: A,
        router: Arc<Router>,
        tx_cmd: mpsc::Sender<ServerCommand<S>>,
    ) -> Self {
        Self {
            id,
            version,
            dst_connector,
            authorizer,
            router,
            guard: Arc::new(Mutex::new(DisconnectGuard::new(id, tx_cmd))),
        }
    }

    fn error_reply(&self, err: &Error) -> ConnectReply {
        ConnectReply {
            version: self.version,
            connect_result: Err(err.cerr()),
            bind_addr: ConnectReply::unbound(),
        }
    }

    fn make_session(
        &self,
        src_addr: SocketAddr,
        mut src_conn: impl ByteStream + 'static,
    ) -> Result<RelayHandle, Error> {
        debug!("session {}: client {}", self.id, src_addr);
        let select = {
            let mut socks = ReadWriteStream::new(&mut src_conn);
            negotiate_auth_method(self.version, &self.authorizer, &mut socks)?
        };
        debug!("auth method: {:?}", select);

        let mut socks = ReadWriteStream::new(self.authorizer.authorize(select.method, src_conn)?);

        let req = match socks.recv_connect_request() {
            Ok(req) => req,
            Err(err) => {
                // an unknown ATYP gets its dedicated reply before the close
                if let ErrorKind::AddrTypeNotSupported { .. } = err.kind() {
                    socks.send_connect_reply(self.error_reply(&err))?;
                }
                return Err(err);
            }
        };
        debug!("connect request: {:?}", req);

        if req.version != self.version {
            return Err(ErrorKind::message_fmt(format_args!(
                "unsupported socks version: {}",
                req.version
            ))
            .into());
        }

        match req.command {
            Command::Connect => {}
            cmd @ Command::Bind | cmd @ Command::UdpAssociate => {
                debug!("command not supported: {:?}", cmd);
                let err: Error = ErrorKind::command_not_supported(cmd).into();
                socks.send_connect_reply(self.error_reply(&err))?;
                return Err(err);
            }
        }

        let decision = self
            .router
            .route(&req.connect_to.host(), req.connect_to.port());
        info!(
            "route: {} -> {} (rule {}: {})",
            req.connect_to, decision.label, decision.rule_id, decision.rule_name
        );

        let (dst_conn, local_addr) =
            match self.dst_connector.connect(&req.connect_to, &decision.label) {
                Ok(conn) => conn,
                Err(err) => {
                    warn!("connect error: {}: {}", req.connect_to, err);
                    socks.send_connect_reply(self.error_reply(&err))?;
                    return Err(err);
                }
            };
        info!("connected: {} via {}", req.connect_to, decision.label);

        socks.send_connect_reply(ConnectReply {
            version: self.version,
            connect_result: Ok(()),
            bind_addr: local_addr.into(),
        })?;

        // the deadline spanned the greeting and the request only
        let client_conn = socks.into_inner();
        client_conn.set_rw_timeout(None)?;

        relay::spawn_relay(self.id, client_conn, dst_conn, self.guard.clone())
    }

    pub fn start(
        &self,
        src_addr: SocketAddr,
        src_conn: impl ByteStream + 'static,
    ) -> Result<RelayHandle, Error> {
        self.make_session(src_addr, src_conn)
    }
}

fn negotiate_auth_method(
    version: ProtocolVersion,
    auth: &impl AuthService,
    socks: &mut impl SocksStream,
) -> Result<MethodSelection, Error> {
    let candidates = socks.recv_method_candidates()?;
    trace!("candidates: {:?}", candidates);

    if candidates.version != version {
        // hard close without a reply
        return Err(ErrorKind::message_fmt(format_args!(
            "unsupported socks version: {}",
            candidates.version
        ))
        .into());
    }

    let selection = auth.select(&candidates.method)?;
    trace!("selection: {:?}", selection);

    let method_sel = MethodSelection {
        version,
        method: selection.unwrap_or(Method::NoMethods),
    };
    socks.send_method_selection(method_sel)?;
    match method_sel.method {
        Method::NoMethods => Err(ErrorKind::NoAcceptableMethod.into()),
        _ => Ok(method_sel),
    }
}

#[derive(Debug)]
pub struct DisconnectGuard<S> {
    id: SessionId,
    tx: mpsc::Sender<ServerCommand<S>>,
}

impl<S> DisconnectGuard<S> {
    pub fn new(id: SessionId, tx: mpsc::Sender<ServerCommand<S>>) -> Self {
        Self { id, tx }
    }
}

impl<S> Drop for DisconnectGuard<S> {
    fn drop(&mut self) {
        debug!("DisconnectGuard: {}", self.id);
        // after Terminate the main thread is gone; nobody is left to care
        self.tx.send(ServerCommand::Disconnect(self.id)).ok();
    }
}
