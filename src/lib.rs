//! This crate provides a library for constructing a local split-tunnel
//! proxy: SOCKS5 and HTTP(S) CONNECT front-ends, an ordered routing rule
//! engine, and an upstream dialer that binds the local socket to the
//! network interface a rule selected.
//!
//! # Feature
//! ## Front-ends
//!
//! Clients connect over [SOCKS5](https://tools.ietf.org/html/rfc1928)
//! (no authentication, `CONNECT` only) or HTTP: `CONNECT` tunneling and
//! one-shot plain-HTTP forwarding.
//!
//! ## Routing
//!
//! An ordered rule list maps each destination `(host, port)` to an
//! interface label (`cable`, `wifi`). The first enabled rule whose
//! predicate accepts the destination decides; an empty predicate is a
//! catch-all. Rules can be replaced at runtime without disturbing
//! established relays.
//!
//! ## Interface binding
//!
//! The dialer asks the interface registry for a local address of the
//! right family on the selected interface and binds the upstream socket
//! to it. When the interface has no usable address the dial degrades to
//! the OS default route instead of failing the client's request.
//!
//! # Usage
//!
//! Here is a minimum server example.
//!
//! ```no_run
//! use std::{thread, time::Duration};
//! use switchyard::*;
//! let mut config = Config::default();
//! config.server.socks_addr = "127.0.0.1:11080".parse().unwrap();
//! config.server.http_addr = "127.0.0.1:18080".parse().unwrap();
//! let (mut server, tx) = server::Server::new(config);
//! let th = thread::spawn(move || server.serve());
//! thread::sleep(Duration::from_secs(1));
//! tx.send(ServerCommand::Terminate).unwrap();
//! th.join().unwrap().unwrap();
//! ```
//!
//! ## Routing rules
//!
//! Rules are ordered; the catch-all default belongs at the end:
//!
//! ```
//! use switchyard::*;
//! let router = router::Router::new(vec![
//!     RouteRule {
//!         id: "streaming".into(),
//!         name: "Streaming via Wi-Fi".into(),
//!         enabled: true,
//!         interface: Label::wifi(),
//!         matcher: RuleMatch {
//!             domains: vec!["*.netflix.com".into()],
//!             ..RuleMatch::default()
//!         },
//!     },
//!     RouteRule::catch_all("default", "Default", Label::cable()),
//! ]);
//! assert_eq!(router.route("api.netflix.com", 443).label, Label::wifi());
//! assert_eq!(router.route("example.com", 443).label, Label::cable());
//! ```

pub mod acceptor;
mod auth_service;
mod byte_stream;
pub mod config;
pub mod connector;
pub mod dialer;
pub mod error;
pub mod http;
pub mod model;
mod raw_message;
pub mod registry;
mod relay;
pub mod resolver;
pub mod router;
mod rw_socks_stream;
pub mod server;
pub mod server_command;
mod session;
mod tcp_listener_ext;

pub use crate::config::*;
pub use crate::model::model::*;
pub use crate::model::rules::*;
pub use crate::resolver::InterfaceSpec;
pub use crate::server::*;
pub use crate::server_command::*;
