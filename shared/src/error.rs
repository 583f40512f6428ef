//! Error kinds surfaced by the networking layer.
//!
//! Timeouts on plain receives are not errors (they come back as `None`);
//! `NetError::Timeout` is only produced where a caller asked for a
//! specific outcome, such as `mreq` or `connect_by_name`.

use crate::request::RequestId;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    /// Hostname lookup failed or produced no address
    #[error("could not resolve {host}: {source}")]
    Resolve { host: String, source: io::Error },

    /// Creating or binding a socket failed
    #[error("socket setup failed: {0}")]
    Socket(#[source] io::Error),

    /// The peer refused or the connect attempt failed for good
    #[error("connecting to {addr} failed: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    #[error("connecting to {host}:{port} timed out")]
    ConnectTimeout { host: String, port: u16 },

    #[error("connection is not connected")]
    NotConnected,

    /// Hard write failure; the connection is left as it was
    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    /// Hard read failure; the connection has been torn down
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("no response within the time budget")]
    Timeout,

    #[error("got response {got}, wanted {expected}")]
    WrongResponse { expected: RequestId, got: RequestId },

    #[error("invalid request id {0}")]
    InvalidRequest(RequestId),

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, NetError>;

impl From<bincode::Error> for NetError {
    fn from(err: bincode::Error) -> Self {
        NetError::Serialization(err.to_string())
    }
}

impl NetError {
    /// True for errors after which the transport is gone.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NetError::Receive(_) | NetError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetError::WrongResponse {
            expected: RequestId::LOGIN,
            got: RequestId::LOGOUT,
        };
        assert_eq!(err.to_string(), "got response 0x02, wanted 0x01");

        let err = NetError::InvalidRequest(RequestId::NONE);
        assert!(err.to_string().contains("0xff"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::other("test");
        let err: NetError = io_err.into();
        assert!(matches!(err, NetError::Io(_)));
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(NetError::Receive(io::ErrorKind::UnexpectedEof.into()).is_fatal());
        assert!(NetError::NotConnected.is_fatal());
        assert!(!NetError::Timeout.is_fatal());
        assert!(!NetError::Send(io::ErrorKind::BrokenPipe.into()).is_fatal());
    }
}
