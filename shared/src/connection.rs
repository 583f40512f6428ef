//! The peer-agnostic connection contract and the request/response primitive.

use crate::error::{NetError, Result};
use crate::packet::Packet;
use crate::request::RequestId;
use log::debug;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

/// Transport a connection runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Plain TCP socket
    Traditional,
}

/// Point in time after which a blocking call gives up.
///
/// All steps of one call share a single deadline, so a budget is never
/// restarted by an intermediate step.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A timeout too large to represent (e.g. [`crate::INFINITE`]) never expires.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    pub fn never() -> Self {
        Self { at: None }
    }

    /// Budget left; [`Duration::MAX`] for a deadline that never expires.
    pub fn remaining(&self) -> Duration {
        match self.at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// One logical conversation with a peer.
///
/// A connection is owned by one caller at a time. [`Connection::disconnect`]
/// is the exception: it may be called from anywhere, and a suspended receive
/// returns promptly when it is.
///
/// Receives return `Ok(None)` when the budget runs out without a packet.
/// `Err` is reserved for conditions the caller has to act on.
pub trait Connection: Send + Sync {
    fn kind(&self) -> ConnectionKind;

    fn is_connected(&self) -> bool;

    /// Closes the transport and drops every stashed packet. Idempotent.
    fn disconnect(&self);

    /// Address of the peer, if there is one.
    fn peer_addr(&self) -> Option<SocketAddr>;

    fn counterpart_ip(&self) -> Option<IpAddr> {
        self.peer_addr().map(|addr| addr.ip())
    }

    /// Writes the whole packet.
    fn send(&self, packet: &Packet) -> impl Future<Output = Result<()>> + Send;

    /// Next packet of any id. With `use_stash`, stashed packets come first.
    ///
    /// `timeout` of [`Duration::ZERO`] polls; [`crate::INFINITE`] waits forever.
    fn wait_for_packet(
        &self,
        use_stash: bool,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Packet>>> + Send;

    /// Next packet carrying `id`. Packets with other ids that arrive in the
    /// meantime are stashed for later.
    fn wait_for_packet_with_id(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Packet>>> + Send;

    fn get_packet_if_present(
        &self,
        use_stash: bool,
    ) -> impl Future<Output = Result<Option<Packet>>> + Send {
        self.wait_for_packet(use_stash, Duration::ZERO)
    }

    /// Drains whatever is readable right now, stashing mismatches, and stops
    /// at the first packet carrying `id`.
    fn get_packet_with_id_if_present(
        &self,
        id: RequestId,
    ) -> impl Future<Output = Result<Option<Packet>>> + Send {
        self.wait_for_packet_with_id(id, Duration::ZERO)
    }

    /// Sends `request` and waits for the response carrying the same id.
    ///
    /// On success `request` holds the response, cursor at payload start.
    /// On failure it is left as it was, rewound.
    fn mreq(
        &self,
        request: &mut Packet,
        timeout: Duration,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let id = request.request_id();
            if !id.is_valid_request() {
                request.rewind();
                return Err(NetError::InvalidRequest(id));
            }

            if let Err(e) = self.send(request).await {
                request.rewind();
                return Err(e);
            }

            let received = match self.wait_for_packet_with_id(id, timeout).await {
                Ok(received) => received,
                Err(e) => {
                    request.rewind();
                    return Err(e);
                }
            };

            match received {
                Some(response) if response.request_id() == id => {
                    debug!("mreq {}: response of {} bytes", id, response.payload_len());
                    request.replace_with(response);
                    Ok(())
                }
                Some(response) => {
                    request.rewind();
                    Err(NetError::WrongResponse {
                        expected: id,
                        got: response.request_id(),
                    })
                }
                None => {
                    request.rewind();
                    Err(NetError::Timeout)
                }
            }
        }
    }
}
