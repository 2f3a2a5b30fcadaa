use std::fmt;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Write side of a split stream.
///
/// `shutdown_write` signals EOF to the peer while the read side stays
/// usable; the relay depends on this half-close discipline.
pub trait WriteHalf: io::Write + Send {
    fn shutdown_write(&mut self) -> io::Result<()>;
}

impl WriteHalf for TcpStream {
    fn shutdown_write(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

/// read/write operations on a byte stream
pub trait ByteStream: fmt::Debug + io::Read + io::Write + Send {
    fn split(&self) -> io::Result<(Box<dyn io::Read + Send>, Box<dyn WriteHalf>)>;

    /// deadline applied to every read and write; `None` clears it
    fn set_rw_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

/// byte stream on a tcp connection
impl ByteStream for TcpStream {
    fn split(&self) -> io::Result<(Box<dyn io::Read + Send>, Box<dyn WriteHalf>)> {
        let rd = self.try_clone()?;
        let wr = self.try_clone()?;
        Ok((Box::new(rd), Box::new(wr)))
    }

    fn set_rw_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)?;
        Ok(())
    }
}

impl<S: ByteStream + ?Sized> ByteStream for Box<S> {
    fn split(&self) -> io::Result<(Box<dyn io::Read + Send>, Box<dyn WriteHalf>)> {
        (**self).split()
    }

    fn set_rw_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_rw_timeout(timeout)
    }
}

pub type BoxedStream = Box<dyn ByteStream>;

#[cfg(test)]
pub mod test {
    use super::*;
    use std::borrow::Cow;
    use std::sync::{Arc, Mutex, MutexGuard};

    /// In-memory stand-in for a socket: reads drain `rd_buff`, writes
    /// append to `wr_buff`. Clones share both buffers.
    #[derive(Debug, Clone)]
    pub struct BufferStream {
        rd_buff: Arc<Mutex<io::Cursor<Vec<u8>>>>,
        wr_buff: Arc<Mutex<io::Cursor<Vec<u8>>>>,
    }

    impl BufferStream {
        pub fn new() -> Self {
            Self::with_buffer(vec![].into(), vec![].into())
        }

        pub fn with_buffer(rd: Cow<[u8]>, wr: Cow<[u8]>) -> Self {
            Self {
                rd_buff: Arc::new(Mutex::new(io::Cursor::new(rd.into_owned()))),
                wr_buff: Arc::new(Mutex::new(io::Cursor::new(wr.into_owned()))),
            }
        }

        pub fn rd_buff(&self) -> MutexGuard<io::Cursor<Vec<u8>>> {
            self.rd_buff.lock().unwrap()
        }

        pub fn wr_buff(&self) -> MutexGuard<io::Cursor<Vec<u8>>> {
            self.wr_buff.lock().unwrap()
        }
    }

    impl io::Read for BufferStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.rd_buff.lock().unwrap().read(buf)
        }
    }

    impl io::Write for BufferStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.wr_buff.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.wr_buff.lock().unwrap().flush()
        }
    }

    impl WriteHalf for BufferStream {
        fn shutdown_write(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ByteStream for BufferStream {
        fn split(&self) -> io::Result<(Box<dyn io::Read + Send>, Box<dyn WriteHalf>)> {
            Ok((Box::new(self.clone()), Box::new(self.clone())))
        }

        fn set_rw_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }
}
