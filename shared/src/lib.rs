//! Wire protocol and connection layer shared by the lobby server and its clients.
//!
//! - [`Packet`]: one typed message, header plus cursor-addressed payload
//! - [`Connection`]: the contract every transport implements, including the
//!   `mreq` request/response primitive
//! - [`TraditionalConnection`]: the TCP transport with stream
//!   resynchronisation and a bounded stash of out-of-order packets

pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod packet;
pub mod request;
pub mod stash;
pub mod transport;

pub use config::{ConnectionConfig, DEFAULT_TIMEOUT, INFINITE};
pub use connection::{Connection, ConnectionKind, Deadline};
pub use error::{NetError, Result};
pub use http::{download_http_file, get_http_file};
pub use packet::{Append, Extract, Packet, PacketHeader, HEADER_LEN, MAGIC};
pub use request::RequestId;
pub use stash::StashQueue;
pub use transport::TraditionalConnection;
