//! HTTP(S) front-end.
//!
//! One request per accepted socket: `CONNECT` opens a tunnel and relays,
//! any other method is re-serialized to the upstream and the response is
//! streamed back until EOF. No keep-alive.
use std::io::{Read, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use log::*;

use crate::byte_stream::ByteStream;
use crate::connector::Connector;
use crate::model::{Address, Error, ErrorKind, SocketAddr};
use crate::relay::{self, RelayHandle};
use crate::router::Router;
use crate::model::rules::host_ip;
use crate::server_command::ServerCommand;
use crate::session::{DisconnectGuard, SessionId};

const MAX_HEADERS: usize = 64;
const MAX_HEAD_BYTES: usize = 64 * 1024;

pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
pub const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

/// One accepted HTTP proxy connection.
pub struct HttpSession<D, S> {
    pub id: SessionId,
    pub dst_connector: D,
    pub router: Arc<Router>,
    guard: Arc<Mutex<DisconnectGuard<S>>>,
}

impl<D, S> HttpSession<D, S>
where
    D: Connector,
    S: Send + 'static,
{
    pub fn new(
        id: SessionId,
        dst_connector: D,
        router: Arc<Router>,
        tx_cmd: mpsc::Sender<ServerCommand<S>>,
    ) -> Self {
        Self {
            id,
            dst_connector,
            router,
            guard: Arc::new(Mutex::new(DisconnectGuard::new(id, tx_cmd))),
        }
    }

    pub fn start(
        &self,
        src_addr: SocketAddr,
        mut src_conn: impl ByteStream + 'static,
    ) -> Result<RelayHandle, Error> {
        debug!("http session {}: client {}", self.id, src_addr);

        // the acceptor armed the header deadline on this socket
        let head = read_head(&mut src_conn)?;
        let req = parse_head(&head.buffer[..head.head_len])?;
        debug!("http request: {} {}", req.method, req.target);

        let (target, leftover) = match req.method.as_str() {
            "CONNECT" => (authority_target(&req.target, 443)?, head.leftover()),
            _ => {
                let (host, port) = host_header_target(&req, 80)?;
                (to_address(&host, port), head.leftover())
            }
        };

        let decision = self.router.route(&target.host(), target.port());
        info!(
            "route: {} {} -> {} (rule {}: {})",
            req.method, target, decision.label, decision.rule_id, decision.rule_name
        );

        let (mut dst_conn, _local_addr) =
            match self.dst_connector.connect(&target, &decision.label) {
                Ok(conn) => conn,
                Err(err) => {
                    warn!("connect error: {}: {}", target, err);
                    src_conn.write_all(BAD_GATEWAY)?;
                    return Err(err);
                }
            };
        info!("connected: {} via {}", target, decision.label);

        if req.method == "CONNECT" {
            src_conn.write_all(CONNECT_ESTABLISHED)?;
        } else {
            // re-serialize the request head in origin form, then any body
            // bytes that arrived with it
            dst_conn.write_all(&serialize_head(&req))?;
        }
        if !leftover.is_empty() {
            dst_conn.write_all(leftover)?;
        }

        // the deadline covered the request head only
        src_conn.set_rw_timeout(None)?;

        relay::spawn_relay(self.id, Box::new(src_conn), dst_conn, self.guard.clone())
    }
}

struct Head {
    buffer: Vec<u8>,
    head_len: usize,
}

impl Head {
    /// bytes past the blank line: start of the body, already read
    fn leftover(&self) -> &[u8] {
        &self.buffer[self.head_len..]
    }
}

/// Accumulate until the `\r\n\r\n` terminator.
fn read_head(conn: &mut impl Read) -> Result<Head, Error> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = find_terminator(&buffer) {
            return Ok(Head {
                buffer,
                head_len: pos,
            });
        }
        if buffer.len() > MAX_HEAD_BYTES {
            return Err(
                ErrorKind::message_fmt(format_args!("request head too large")).into(),
            );
        }
        let n = conn.read(&mut chunk)?;
        if n == 0 {
            return Err(
                ErrorKind::message_fmt(format_args!("eof before end of request head")).into(),
            );
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// position one past the `\r\n\r\n` terminator
fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

#[derive(Debug, Clone)]
struct ParsedRequest {
    method: String,
    target: String,
    minor_version: u8,
    headers: Vec<(String, Vec<u8>)>,
}

impl ParsedRequest {
    fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

fn parse_head(head: &[u8]) -> Result<ParsedRequest, Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(head) {
        Ok(httparse::Status::Complete(_)) => Ok(ParsedRequest {
            method: req.method.unwrap_or("").to_owned(),
            target: req.path.unwrap_or("").to_owned(),
            minor_version: req.version.unwrap_or(1),
            headers: req
                .headers
                .iter()
                .map(|h| (h.name.to_owned(), h.value.to_vec()))
                .collect(),
        }),
        Ok(httparse::Status::Partial) => {
            Err(ErrorKind::message_fmt(format_args!("truncated request head")).into())
        }
        Err(err) => Err(ErrorKind::message_fmt(format_args!("bad request: {}", err)).into()),
    }
}

/// `host[:port]` from a CONNECT request target.
fn authority_target(target: &str, default_port: u16) -> Result<Address, Error> {
    let (host, port) = split_host_port(target, default_port)?;
    Ok(to_address(&host, port))
}

/// Target of a plain request: the `Host` header, falling back to the
/// authority of an absolute-form request target.
fn host_header_target(req: &ParsedRequest, default_port: u16) -> Result<(String, u16), Error> {
    if let Some(value) = req.header("host") {
        let text = String::from_utf8_lossy(value);
        return split_host_port(text.trim(), default_port);
    }
    if let Some(authority) = absolute_form_authority(&req.target) {
        return split_host_port(authority, default_port);
    }
    Err(ErrorKind::message_fmt(format_args!("request without a host")).into())
}

/// `http://host:port/path` -> `host:port`
fn absolute_form_authority(target: &str) -> Option<&str> {
    let rest = target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))?;
    Some(rest.split('/').next().unwrap_or(rest))
}

/// Split `host[:port]`, tolerating the bracketed IPv6 form. A trailing
/// segment that does not parse as a port is treated as part of the host.
fn split_host_port(s: &str, default_port: u16) -> Result<(String, u16), Error> {
    if s.is_empty() {
        return Err(ErrorKind::message_fmt(format_args!("empty host")).into());
    }
    if let Some(rest) = s.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| ErrorKind::message_fmt(format_args!("unclosed bracket: {}", s)))?;
        let host = rest[..end].to_owned();
        let port = match rest[end + 1..].strip_prefix(':') {
            Some(p) => p
                .parse()
                .map_err(|_| ErrorKind::message_fmt(format_args!("bad port: {}", s)))?,
            None => default_port,
        };
        return Ok((host, port));
    }
    match s.rfind(':') {
        // a second colon means a bare ipv6 literal, not a port separator
        Some(pos) if !s[..pos].contains(':') => {
            let port = s[pos + 1..]
                .parse()
                .map_err(|_| ErrorKind::message_fmt(format_args!("bad port: {}", s)))?;
            Ok((s[..pos].to_owned(), port))
        }
        _ => Ok((s.to_owned(), default_port)),
    }
}

fn to_address(host: &str, port: u16) -> Address {
    match host_ip(host) {
        Some(ip) => Address::IpAddr(ip, port),
        None => Address::Domain(host.to_owned(), port),
    }
}

/// Origin-form request line plus the original headers.
fn serialize_head(req: &ParsedRequest) -> Vec<u8> {
    let path = origin_form(&req.target);
    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(
        format!("{} {} HTTP/1.{}\r\n", req.method, path, req.minor_version).as_bytes(),
    );
    for (name, value) in &req.headers {
        // the only hop-by-hop header proxy clients add
        if name.eq_ignore_ascii_case("proxy-connection") {
            continue;
        }
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value);
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    head
}

fn origin_form(target: &str) -> &str {
    let rest = match target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
    {
        Some(rest) => rest,
        None => return target,
    };
    match rest.find('/') {
        Some(pos) => &rest[pos..],
        None => "/",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::byte_stream::test::BufferStream;
    use crate::connector::test::BufferConnector;
    use crate::model::{ConnectError, Label, RouteRule, RuleMatch};
    use std::iter::FromIterator;

    fn netflix_router() -> Arc<Router> {
        Arc::new(Router::new(vec![
            RouteRule {
                id: "netflix".to_owned(),
                name: "Netflix via Wi-Fi".to_owned(),
                enabled: true,
                interface: Label::wifi(),
                matcher: RuleMatch {
                    domains: vec!["*.netflix.com".to_owned()],
                    ..RuleMatch::default()
                },
            },
            RouteRule::catch_all("default", "Default", Label::cable()),
        ]))
    }

    #[test]
    fn split_host_port_forms() {
        assert_eq!(
            split_host_port("example.com:8443", 443).unwrap(),
            ("example.com".to_owned(), 8443)
        );
        assert_eq!(
            split_host_port("example.com", 443).unwrap(),
            ("example.com".to_owned(), 443)
        );
        assert_eq!(
            split_host_port("[2001:db8::1]:8080", 443).unwrap(),
            ("2001:db8::1".to_owned(), 8080)
        );
        assert_eq!(
            split_host_port("[2001:db8::1]", 443).unwrap(),
            ("2001:db8::1".to_owned(), 443)
        );
        assert_eq!(
            split_host_port("2001:db8::1", 443).unwrap(),
            ("2001:db8::1".to_owned(), 443)
        );
        assert!(split_host_port("example.com:notaport", 443).is_err());
        assert!(split_host_port("", 443).is_err());
    }

    #[test]
    fn origin_form_of_absolute_target() {
        assert_eq!(origin_form("/path?q=1"), "/path?q=1");
        assert_eq!(origin_form("http://example.com/path?q=1"), "/path?q=1");
        assert_eq!(origin_form("http://example.com"), "/");
    }

    fn run_session(
        input: &[u8],
        connector: BufferConnector<BufferStream>,
        router: Arc<Router>,
    ) -> (BufferStream, Result<(), Error>) {
        let (tx, _rx) = mpsc::channel::<ServerCommand<()>>();
        let session = HttpSession::new(1.into(), connector, router, tx);
        let src = BufferStream::with_buffer(input.into(), vec![].into());
        let result = session
            .start("127.0.0.1:54321".parse().unwrap(), src.clone())
            .map(|relay| {
                relay.join().unwrap().ok();
            });
        (src, result)
    }

    #[test]
    fn connect_establishes_and_relays() {
        let target = Address::Domain("api.netflix.com".to_owned(), 443);
        let upstream = BufferStream::with_buffer((&b"tls bytes back"[..]).into(), vec![].into());
        let connector =
            BufferConnector::from_iter(vec![(target.clone(), Ok(upstream))]);

        let input = b"CONNECT api.netflix.com:443 HTTP/1.1\r\nHost: api.netflix.com:443\r\n\r\nclient hello";
        let (src, result) = run_session(input, connector.clone(), netflix_router());
        result.unwrap();

        assert_eq!(connector.last_label(), Some(Label::wifi()));

        let written = src.wr_buff().clone().into_inner();
        // exactly the 39-byte literal, then the relayed upstream bytes
        assert_eq!(&written[..CONNECT_ESTABLISHED.len()], CONNECT_ESTABLISHED);
        assert_eq!(CONNECT_ESTABLISHED.len(), 39);
        assert_eq!(&written[CONNECT_ESTABLISHED.len()..], b"tls bytes back");

        // bytes that followed the head reached the upstream
        let upstream_written = connector.stream(&target).wr_buff().clone().into_inner();
        assert_eq!(upstream_written, b"client hello");
    }

    #[test]
    fn connect_default_port_is_https() {
        let target = Address::Domain("api.netflix.com".to_owned(), 443);
        let connector =
            BufferConnector::from_iter(vec![(target, Ok(BufferStream::new()))]);
        let input = b"CONNECT api.netflix.com HTTP/1.1\r\n\r\n";
        let (_src, result) = run_session(input, connector.clone(), netflix_router());
        result.unwrap();
        assert_eq!(connector.last_label(), Some(Label::wifi()));
    }

    #[test]
    fn dial_failure_is_bad_gateway() {
        let target = Address::Domain("api.netflix.com".to_owned(), 443);
        let connector = BufferConnector::<BufferStream>::from_iter(vec![(
            target,
            Err(ConnectError::HostUnreachable),
        )]);
        let input = b"CONNECT api.netflix.com:443 HTTP/1.1\r\n\r\n";
        let (src, result) = run_session(input, connector, netflix_router());
        assert!(result.is_err());
        assert_eq!(src.wr_buff().clone().into_inner(), BAD_GATEWAY);
    }

    #[test]
    fn plain_request_is_forwarded_in_origin_form() {
        let target = Address::Domain("example.com".to_owned(), 80);
        let upstream = BufferStream::with_buffer(
            (&b"HTTP/1.1 204 No Content\r\n\r\n"[..]).into(),
            vec![].into(),
        );
        let connector =
            BufferConnector::from_iter(vec![(target.clone(), Ok(upstream))]);

        let input = b"GET http://example.com/path?q=1 HTTP/1.1\r\nHost: example.com\r\nProxy-Connection: keep-alive\r\nUser-Agent: curl\r\n\r\n";
        let (src, result) = run_session(input, connector.clone(), netflix_router());
        result.unwrap();

        // default rule: not a netflix host
        assert_eq!(connector.last_label(), Some(Label::cable()));

        let upstream_written = connector.stream(&target).wr_buff().clone().into_inner();
        let text = String::from_utf8(upstream_written).unwrap();
        assert!(text.starts_with("GET /path?q=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.contains("User-Agent: curl\r\n"));
        assert!(!text.to_ascii_lowercase().contains("proxy-connection"));
        assert!(text.ends_with("\r\n\r\n"));

        // response streamed back verbatim
        assert_eq!(
            src.wr_buff().clone().into_inner(),
            b"HTTP/1.1 204 No Content\r\n\r\n"
        );
    }

    #[test]
    fn plain_request_body_reaches_upstream() {
        let target = Address::Domain("example.com".to_owned(), 80);
        let connector =
            BufferConnector::from_iter(vec![(target.clone(), Ok(BufferStream::new()))]);
        let input = b"POST / HTTP/1.1\r\nHost: example.com\r\nContent-Length: 4\r\n\r\nbody";
        let (_src, result) = run_session(input, connector.clone(), netflix_router());
        result.unwrap();

        let upstream_written = connector.stream(&target).wr_buff().clone().into_inner();
        let text = String::from_utf8(upstream_written).unwrap();
        assert!(text.ends_with("\r\n\r\nbody"));
    }

    #[test]
    fn request_without_host_is_a_protocol_error() {
        let connector = BufferConnector::<BufferStream>::from_iter(vec![]);
        let input = b"GET /path HTTP/1.1\r\n\r\n";
        let (src, result) = run_session(input, connector, netflix_router());
        match result.unwrap_err().kind() {
            ErrorKind::MessageFormat { .. } => {}
            other => panic!("unexpected error kind: {:?}", other),
        }
        // closed silently
        assert!(src.wr_buff().clone().into_inner().is_empty());
    }
}
