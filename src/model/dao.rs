use crate::model::error::Error;
use crate::model::model::*;

/// SOCKS5 message-level operations on a client connection.
pub trait SocksStream {
    fn recv_method_candidates(&mut self) -> Result<MethodCandidates, Error>;
    fn send_method_selection(&mut self, method: MethodSelection) -> Result<(), Error>;
    fn recv_connect_request(&mut self) -> Result<ConnectRequest, Error>;
    fn send_connect_reply(&mut self, reply: ConnectReply) -> Result<(), Error>;
}
