use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::{
    mpsc::{self, Receiver, Sender, SyncSender},
    Arc, Mutex,
};
use std::thread;

use log::*;
use rand::prelude::*;
use rand::rngs::StdRng;

use crate::acceptor::{Binder, TcpBinder};
use crate::auth_service::NoAuthService;
use crate::byte_stream::ByteStream;
use crate::config::{Config, InterfacesSection};
use crate::connector::Connector;
use crate::dialer::InterfaceDialer;
use crate::error::Error;
use crate::http::HttpSession;
use crate::model::{Label, ProtocolVersion, SocketAddr};
use crate::registry::IfaceRegistry;
use crate::resolver::IfaceResolver;
use crate::router::Router;
use crate::server_command::{Proto, ServerCommand};
use crate::session::{Session, SessionHandle, SessionId};

pub struct Server<S, T, C> {
    config: Config,
    tx_cmd: Sender<ServerCommand<S>>,
    rx_cmd: Receiver<ServerCommand<S>>,
    /// binds both front-end listeners
    binder: T,
    /// stops the accept loops; one message per acceptor
    tx_acceptor_done: SyncSender<()>,
    /// opens upstream connections
    connector: C,
    router: Arc<Router>,
    registry: Arc<IfaceRegistry>,
    resolver: IfaceResolver,
    protocol_version: ProtocolVersion,
    session: HashMap<SessionId, SessionHandle>,
    /// random context for generating SessionIds
    id_rng: StdRng,
}

/// spawn a thread sending accepted streams to `tx`
fn spawn_acceptor<S>(
    proto: Proto,
    acceptor: impl Iterator<Item = (S, SocketAddr)> + Send + 'static,
    tx: Sender<ServerCommand<S>>,
) -> thread::JoinHandle<()>
where
    S: ByteStream + 'static,
{
    use ServerCommand::*;
    thread::spawn(move || {
        for (strm, addr) in acceptor {
            if tx.send(Connect(strm, addr, proto)).is_err() {
                info!("disconnected ServerCommand chan: {}", proto);
                break;
            }
        }
    })
}

/// Resolve the configured specs into label bindings, falling back to
/// auto-detection when a spec is invalid or does not resolve.
fn resolve_bindings(
    resolver: &IfaceResolver,
    interfaces: &InterfacesSection,
) -> HashMap<Label, String> {
    let mut bindings = HashMap::new();
    let mut detected: Option<(Option<String>, Option<String>)> = None;

    let specs = [
        (Label::cable(), &interfaces.cable),
        (Label::wifi(), &interfaces.wifi),
    ];
    for (label, spec) in &specs {
        match resolver.resolve(spec) {
            Ok(device) => {
                info!("interface {}: device {}", label, device);
                bindings.insert(label.clone(), device);
            }
            Err(err) => {
                warn!("interface {}: {}; trying auto-detection", label, err);
                let (cable, wifi) =
                    detected.get_or_insert_with(IfaceRegistry::detect_defaults);
                let fallback = if label == &Label::cable() {
                    cable.clone()
                } else {
                    wifi.clone()
                };
                match fallback {
                    Some(device) => {
                        info!("interface {}: auto-detected device {}", label, device);
                        bindings.insert(label.clone(), device);
                    }
                    // dials through this label degrade to the default route
                    None => warn!("interface {}: no device bound", label),
                }
            }
        }
    }
    bindings
}

impl Server<TcpStream, TcpBinder, InterfaceDialer> {
    pub fn new(config: Config) -> (Self, Sender<ServerCommand<TcpStream>>) {
        let resolver = IfaceResolver::new();
        let bindings = resolve_bindings(&resolver, &config.interfaces);
        let registry = Arc::new(IfaceRegistry::new(bindings));
        for label in &[Label::cable(), Label::wifi()] {
            match registry.local_addr(label) {
                Ok(addr) => info!("interface {} ready: {}", label, addr.ip()),
                Err(err) => warn!("interface {} not ready: {}", label, err),
            }
        }
        let connector = InterfaceDialer::new(registry.clone(), config.dial_timeout());

        let (tx_done, rx_done) = mpsc::sync_channel(2);
        let binder = TcpBinder::new(
            config.handshake_timeout(),
            Arc::new(Mutex::new(rx_done)),
            Some(std::time::Duration::from_secs(1)),
        );
        Server::with_binder(config, binder, tx_done, connector, resolver, registry)
    }
}

impl<S, T, C> Server<S, T, C>
where
    S: ByteStream + 'static,
    T: Binder<Stream = S>,
    C: Connector + Clone + 'static,
{
    pub fn with_binder(
        config: Config,
        binder: T,
        tx_acceptor_done: SyncSender<()>,
        connector: C,
        resolver: IfaceResolver,
        registry: Arc<IfaceRegistry>,
    ) -> (Self, Sender<ServerCommand<S>>) {
        let router = Arc::new(Router::new(config.routes.clone()));
        let (tx, rx) = mpsc::channel();
        (
            Self {
                config,
                tx_cmd: tx.clone(),
                rx_cmd: rx,
                binder,
                tx_acceptor_done,
                connector,
                router,
                registry,
                resolver,
                protocol_version: ProtocolVersion::from(5),
                session: HashMap::new(),
                id_rng: StdRng::from_entropy(),
            },
            tx,
        )
    }

    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    fn next_session_id(&mut self) -> SessionId {
        loop {
            let next_candidate = self.id_rng.next_u64().into();
            if self.session.contains_key(&next_candidate) {
                continue;
            }
            trace!("next session id is issued: {}", next_candidate);
            return next_candidate;
        }
    }

    fn spawn_connection(&mut self, stream: S, addr: SocketAddr, proto: Proto) {
        let id = self.next_session_id();
        let handle = match proto {
            Proto::Socks5 => {
                let session = Session::new(
                    id,
                    self.protocol_version,
                    self.connector.clone(),
                    NoAuthService::new(),
                    self.router.clone(),
                    self.tx_cmd.clone(),
                );
                SessionHandle::new(
                    addr,
                    thread::spawn(move || session.start(addr, stream)),
                )
            }
            Proto::Http => {
                let session =
                    HttpSession::new(id, self.connector.clone(), self.router.clone(), self.tx_cmd.clone());
                SessionHandle::new(
                    addr,
                    thread::spawn(move || session.start(addr, stream)),
                )
            }
        };
        self.session.insert(id, handle);
    }

    fn apply_reload(&mut self, config: Config) {
        info!("applying configuration reload");
        let bindings = resolve_bindings(&self.resolver, &config.interfaces);
        self.registry.rebind(bindings);
        self.router.update_rules(config.routes.clone());
        log::set_max_level(config.logging.level.to_filter());
        self.config = config;
    }

    pub fn serve(&mut self) -> Result<(), Error> {
        let socks_acceptor = self.binder.bind(self.config.server.socks_addr)?;
        let http_acceptor = self.binder.bind(self.config.server.http_addr)?;
        info!(
            "listening: socks5 on {}, http on {}",
            self.config.server.socks_addr, self.config.server.http_addr
        );

        let accept_socks = spawn_acceptor(Proto::Socks5, socks_acceptor, self.tx_cmd.clone());
        let accept_http = spawn_acceptor(Proto::Http, http_acceptor, self.tx_cmd.clone());

        while let Ok(cmd) = self.rx_cmd.recv() {
            use ServerCommand::*;
            debug!("cmd: {:?}", cmd);
            match cmd {
                Terminate => {
                    trace!("stopping accept threads...");
                    self.tx_acceptor_done.send(()).ok();
                    self.tx_acceptor_done.send(()).ok();
                    accept_socks.join().ok();
                    accept_http.join().ok();
                    trace!("accept threads are stopped");
                    // in-flight relays drain on their own
                    if !self.session.is_empty() {
                        info!("{} relays left draining", self.session.len());
                    }
                    break;
                }
                Connect(stream, addr, proto) => {
                    info!("connect from: {} ({})", addr, proto);
                    self.spawn_connection(stream, addr, proto);
                }
                Disconnect(id) => {
                    if let Some(session) = self.session.remove(&id) {
                        let addr = session.client_addr();
                        match session.join() {
                            Ok(Ok(())) => info!("session is stopped: {} ({})", id, addr),
                            Ok(Err(err)) => {
                                debug!("session error: {} ({}): {}", id, addr, err);
                            }
                            Err(err) => error!("session panic: {}: {:?}", id, err),
                        }
                    } else {
                        error!("session not found: {}", id);
                    }
                }
                Reload(config) => self.apply_reload(config),
            }
        }
        info!("server shutdown");
        Ok(())
    }
}
