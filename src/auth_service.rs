use std::io;

use crate::byte_stream::{BoxedStream, ByteStream};
use crate::model::{Error, Method};

/// Method negotiation seam.
///
/// The proxy only ships `NoAuthService`; authenticated SOCKS is out of
/// scope, but the selection logic (including the `0xFF` refusal) lives
/// behind this trait.
pub trait AuthService: Send {
    /// decide auth method from candidates
    ///
    /// Returning `None` means no acceptable method: the caller replies
    /// `NoMethods` and closes.
    fn select(&self, candidates: &[Method]) -> Result<Option<Method>, Error>;

    /// perform authentication, then return the wrapped stream
    fn authorize<'a, B>(&self, method: Method, conn: B) -> Result<BoxedStream, Error>
    where
        B: ByteStream + 'static;
}

/// `NoAuth` method compeller
#[derive(Debug, Clone)]
pub struct NoAuthService;

impl NoAuthService {
    pub fn new() -> Self {
        Self
    }
}

impl AuthService for NoAuthService {
    fn select(&self, candidates: &[Method]) -> Result<Option<Method>, Error> {
        if candidates.contains(&Method::NoAuth) {
            Ok(Some(Method::NoAuth))
        } else {
            Ok(None)
        }
    }

    fn authorize<'a, B>(&self, method: Method, conn: B) -> Result<BoxedStream, Error>
    where
        B: ByteStream + 'static,
    {
        if method != Method::NoAuth {
            let e = io::Error::new(io::ErrorKind::InvalidInput, method.to_string());
            return Err(e.into());
        }
        // pass through without any authentication
        Ok(Box::new(conn))
    }
}
