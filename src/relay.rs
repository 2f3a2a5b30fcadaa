use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::*;

use crate::byte_stream::{BoxedStream, ByteStream, WriteHalf};
use crate::model::Error;
use crate::session::{DisconnectGuard, SessionId};

#[derive(Debug)]
pub struct RelayHandle {
    outbound_th: JoinHandle<Result<(), Error>>,
    incoming_th: JoinHandle<Result<(), Error>>,
}

impl RelayHandle {
    fn new(
        outbound_th: JoinHandle<Result<(), Error>>,
        incoming_th: JoinHandle<Result<(), Error>>,
    ) -> Self {
        Self {
            outbound_th,
            incoming_th,
        }
    }

    pub fn join(self) -> thread::Result<Result<(), Error>> {
        self.outbound_th.join().and(self.incoming_th.join())
    }
}

/// Spawn the two copy threads of a connection pair.
///
/// Each direction runs until EOF and then half-closes its destination so
/// the peer observes a clean stream termination; the pair is finished
/// when both threads are. The shared guard notifies the server once the
/// second thread drops it.
pub fn spawn_relay<S>(
    id: SessionId,
    client_conn: BoxedStream,
    server_conn: impl ByteStream,
    guard: Arc<Mutex<DisconnectGuard<S>>>,
) -> Result<RelayHandle, Error>
where
    S: Send + 'static,
{
    let (read_client, write_client) = client_conn.split()?;
    let (read_server, write_server) = server_conn.split()?;

    let outbound_th = {
        let guard = guard.clone();
        spawn_thread("relay-outbound", move || {
            relay_half(id, "outbound", guard, read_client, write_server)
        })?
    };
    let incoming_th = spawn_thread("relay-incoming", move || {
        relay_half(id, "incoming", guard, read_server, write_client)
    })?;
    Ok(RelayHandle::new(outbound_th, incoming_th))
}

fn relay_half<S>(
    id: SessionId,
    name: &str,
    guard: Arc<Mutex<DisconnectGuard<S>>>,
    mut src: Box<dyn io::Read + Send>,
    mut dst: Box<dyn WriteHalf>,
) -> Result<(), Error> {
    let _guard = guard;
    let result = io::copy(&mut src, &mut dst);

    // EOF and error alike: the peer gets to see the stream end
    if let Err(err) = dst.shutdown_write() {
        trace!("shutdown ({}/{}): {}", id, name, err);
    }

    match result {
        Ok(amount) => {
            debug!("relay done ({}/{}): {} bytes", id, name, amount);
            Ok(())
        }
        Err(err) => {
            debug!("relay error ({}/{}): {}", id, name, err);
            Err(err.into())
        }
    }
}

/// spawn a `name`d thread performing `f`
fn spawn_thread<F, R>(name: &str, f: F) -> Result<JoinHandle<R>, Error>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .map_err(Into::into)
}
