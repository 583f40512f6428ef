//! Listening socket that hands accepted connections to a dispatcher.

use log::{debug, warn};
use shared::{ConnectionConfig, Deadline, NetError, Result, TraditionalConnection};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

/// Receives every accepted connection and decides where it runs.
pub trait ConnectionDispatcher: Send + Sync {
    fn dispatch(&self, conn: TraditionalConnection);
}

impl<F> ConnectionDispatcher for F
where
    F: Fn(TraditionalConnection) + Send + Sync,
{
    fn dispatch(&self, conn: TraditionalConnection) {
        self(conn)
    }
}

/// Owns a listening socket on one port and accepts at most one connection
/// per call to [`SocketConnectionWaiter::wait_for_then_accept`].
pub struct SocketConnectionWaiter<D> {
    listener: Option<TcpListener>,
    dispatcher: D,
    config: ConnectionConfig,
}

impl<D: ConnectionDispatcher> SocketConnectionWaiter<D> {
    /// Accepted connections are built with `config`.
    pub fn new(dispatcher: D, config: ConnectionConfig) -> Self {
        Self {
            listener: None,
            dispatcher,
            config,
        }
    }

    /// Listens on every interface. Port 0 picks a free port.
    pub async fn init(&mut self, port: u16) -> Result<()> {
        self.init_on("0.0.0.0", port).await
    }

    pub async fn init_on(&mut self, host: &str, port: u16) -> Result<()> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(NetError::Socket)?;
        debug!("listening on {:?}", listener.local_addr());
        self.listener = Some(listener);
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref()?.local_addr().ok()
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Waits up to `timeout` for one inbound connection and dispatches it.
    ///
    /// Returns `false` on timeout, on an accept error, or when not listening.
    pub async fn wait_for_then_accept(&self, timeout: Duration) -> bool {
        let Some(listener) = self.listener.as_ref() else {
            return false;
        };

        let deadline = Deadline::after(timeout);
        match tokio::time::timeout(deadline.remaining(), listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                debug!("accepted connection from {}", addr);
                let conn = TraditionalConnection::from_stream(stream, self.config.clone());
                self.dispatcher.dispatch(conn);
                true
            }
            Ok(Err(e)) => {
                warn!("accept failed: {}", e);
                false
            }
            Err(_) => false,
        }
    }

    /// Accepts connections until `shutdown` resolves, waiting at most
    /// `accept_timeout` per round. Returns how many were handed off.
    pub async fn accept_until<F>(&self, accept_timeout: Duration, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut accepted = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => return accepted,
                handed_off = self.wait_for_then_accept(accept_timeout) => {
                    if handed_off {
                        accepted += 1;
                    } else if !self.is_listening() {
                        return accepted;
                    }
                }
            }
        }
    }

    /// Stops listening. Connections already handed off are unaffected.
    pub fn deinit(&mut self) {
        if self.listener.take().is_some() {
            debug!("listener closed");
        }
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }
}
