//! Per-connection session on the lobby server.
//!
//! The session answers every valid request on the connection that carried
//! it. Real lobby logic (accounts, chat channels, game lists) plugs in at
//! [`respond`]; what ships here is the loopback behaviour clients use to
//! check that the server is alive.

use log::{debug, info, warn};
use shared::{Connection, Packet, RequestId, TraditionalConnection};
use std::time::Duration;

/// Status byte acknowledging a request.
pub const ERR_OK: u8 = 0;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent `LOGOUT` and got its acknowledgement.
    LoggedOut,
    /// Nothing arrived within the idle timeout.
    IdleTimeout,
    /// The transport failed or the peer went away.
    Disconnected,
}

/// One connected client.
pub struct Client {
    pub id: u32,
    conn: TraditionalConnection,
    idle_timeout: Duration,
}

impl Client {
    pub fn new(id: u32, conn: TraditionalConnection, idle_timeout: Duration) -> Self {
        Self {
            id,
            conn,
            idle_timeout,
        }
    }

    /// Serves requests until the client logs out, goes idle or drops.
    /// The connection is closed on every exit path.
    pub async fn run(self) -> SessionEnd {
        let end = self.serve().await;
        self.conn.disconnect();
        end
    }

    async fn serve(&self) -> SessionEnd {
        loop {
            let request = match self.conn.wait_for_packet(true, self.idle_timeout).await {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    info!("client {} idle for {:?}, closing", self.id, self.idle_timeout);
                    return SessionEnd::IdleTimeout;
                }
                Err(e) => {
                    debug!("client {} dropped: {}", self.id, e);
                    return SessionEnd::Disconnected;
                }
            };

            let id = request.request_id();
            if !id.is_valid_request() {
                debug!("client {} sent reserved id {}, ignoring", self.id, id);
                continue;
            }

            let response = respond(request);
            if let Err(e) = self.conn.send(&response).await {
                warn!("client {}: could not answer {}: {}", self.id, id, e);
                if e.is_fatal() {
                    return SessionEnd::Disconnected;
                }
                continue;
            }

            if id == RequestId::LOGOUT {
                info!("client {} logged out", self.id);
                return SessionEnd::LoggedOut;
            }
        }
    }
}

/// Builds the answer to one request; it always carries the request's id.
///
/// `LOGOUT` is acknowledged with [`ERR_OK`]. A payload that is the string
/// `ping` is answered with `pong`. Anything else is echoed back unchanged.
pub fn respond(mut request: Packet) -> Packet {
    let id = request.request_id();
    if id == RequestId::LOGOUT {
        let mut ack = Packet::new(id);
        ack.append(ERR_OK);
        return ack;
    }

    if request.get_string() == "ping" && request.remaining() == 0 {
        let mut pong = Packet::new(id);
        pong.append("pong");
        return pong;
    }

    request.rewind();
    request
}
