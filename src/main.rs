//! A split-tunnel proxy daemon.
//!
//! switchyardd terminates SOCKS5 and HTTP(S) CONNECT clients, routes each
//! destination through the configured rule list and dials upstream bound
//! to the selected network interface.
//!
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use log::*;
use structopt::*;

use switchyard as sw;

#[derive(StructOpt, Debug)]
#[structopt(name = "switchyard")]
struct Opt {
    #[structopt(short = "c", long = "config", default_value = "switchyard.yml")]
    /// Set path to the configuration file (format: yaml)
    config: PathBuf,

    #[structopt(long = "socks-addr")]
    /// Override the SOCKS5 listen address
    socks_addr: Option<SocketAddr>,

    #[structopt(long = "http-addr")]
    /// Override the HTTP proxy listen address
    http_addr: Option<SocketAddr>,
}

fn set_handler(signals: &[i32], handler: impl Fn(i32) + Send + 'static) -> io::Result<()> {
    use signal_hook::*;
    let signals = iterator::Signals::new(signals)?;
    std::thread::spawn(move || signals.forever().for_each(handler));
    Ok(())
}

fn main() {
    use signal_hook::*;
    // the gate below is the effective filter; the builder passes everything
    pretty_env_logger::formatted_timed_builder()
        .filter_level(LevelFilter::Trace)
        .init();
    log::set_max_level(LevelFilter::Info);

    println!("switchyardd");
    let opt = Opt::from_args();
    debug!("option: {:?}", opt);

    let mut config = match sw::Config::with_file(&opt.config) {
        Ok(config) => config,
        Err(err) => match err.kind() {
            // the file parsed; what it asks for is wrong
            sw::error::ErrorKind::ConfigValidate => {
                error!("config error: {}: {}", opt.config.display(), err);
                process::exit(1);
            }
            _ => {
                warn!(
                    "cannot load config: {}: {}; using built-in defaults",
                    opt.config.display(),
                    err
                );
                sw::Config::default()
            }
        },
    };
    if let Some(addr) = opt.socks_addr {
        config.server.socks_addr = addr;
    }
    if let Some(addr) = opt.http_addr {
        config.server.http_addr = addr;
    }
    log::set_max_level(config.logging.level.to_filter());
    info!("routes loaded: {}", config.routes.len());
    for rule in &config.routes {
        debug!(
            "route rule: {} ({}) -> {} enabled={}",
            rule.id, rule.name, rule.interface, rule.enabled
        );
    }

    let (mut server, tx) = sw::server::Server::new(config);

    {
        let tx = tx.clone();
        set_handler(&[SIGTERM, SIGINT, SIGQUIT], move |_| {
            tx.send(sw::ServerCommand::Terminate).ok();
        })
        .expect("setting signal handler");
    }

    // keep the watcher alive for the lifetime of the server
    let _watch = match sw::config::watch(&opt.config, move |config| {
        tx.send(sw::ServerCommand::Reload(config)).ok();
    }) {
        Ok(watch) => Some(watch),
        Err(err) => {
            warn!("config watch disabled: {}", err);
            None
        }
    };

    if let Err(err) = server.serve() {
        error!("server error: {}", err);
        process::exit(1);
    }
}
