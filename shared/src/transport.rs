//! TCP transport: connect with timeout, stream resynchronisation and
//! budgeted reads.

use crate::config::{ConnectionConfig, INFINITE};
use crate::connection::{Connection, ConnectionKind, Deadline};
use crate::error::{NetError, Result};
use crate::packet::{Packet, PacketHeader, HEADER_LEN, MAGIC};
use crate::request::RequestId;
use crate::stash::StashQueue;
use bytes::BytesMut;
use log::{debug, trace};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

/// Pause between connect attempts that failed with a transient error.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Raw reads are buffered in steps of this size.
const RAW_CHUNK_LEN: usize = 64 * 1024;

type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Fills `buf` completely.
///
/// `stall` bounds the wait for each individual read, so a peer that keeps
/// sending is never cut off while an idle one is. `deadline` caps the whole
/// call: once it has passed, only data that is already readable is taken.
/// Returns `Ok(false)` once a read stalls; bytes read up to that point are
/// lost. End of stream and hard errors are [`NetError::Receive`].
pub async fn recv_exact<R>(
    reader: &mut R,
    buf: &mut [u8],
    stall: Duration,
    deadline: &Deadline,
) -> Result<bool>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let limit = stall.min(deadline.remaining());
        let read = reader.read(&mut buf[filled..]);
        let outcome = if limit == INFINITE {
            Ok(read.await)
        } else {
            tokio::time::timeout(limit, read).await
        };

        match outcome {
            Err(_) => return Ok(false),
            Ok(Ok(0)) => {
                return Err(NetError::Receive(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )))
            }
            Ok(Ok(n)) => filled += n,
            Ok(Err(e))
                if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) =>
            {
                continue
            }
            Ok(Err(e)) => return Err(NetError::Receive(e)),
        }
    }
    Ok(true)
}

/// Reads single bytes until the last four seen spell the magic.
///
/// The window slides by one byte, so a damaged magic followed by a real one
/// (`FTFTSS`) still lines up on the real one.
async fn scan_for_magic<R>(reader: &mut R, deadline: &Deadline) -> Result<bool>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut window = [0u8; 4];
    let mut skipped = 0usize;
    loop {
        let mut byte = [0u8; 1];
        if !recv_exact(reader, &mut byte, INFINITE, deadline).await? {
            return Ok(false);
        }

        window.rotate_left(1);
        window[3] = byte[0];
        if window == MAGIC {
            if skipped > 0 {
                trace!("resynchronised after skipping {} bytes", skipped);
            }
            return Ok(true);
        }
        skipped += 1;
    }
}

/// Reads the next well-formed packet off the stream.
///
/// Garbage in front of a packet is skipped. Headers declaring an empty or
/// oversized payload are dropped and scanning resumes. `timeout` covers the
/// search for the magic; once it is found the remainder of the packet must
/// arrive within the larger of what is left of `timeout` and `frame_grace`,
/// so a poll that catches the start of a packet does not leave its tail on
/// the stream.
pub async fn read_packet<R>(
    reader: &mut R,
    timeout: Duration,
    max_payload_len: u32,
    frame_grace: Duration,
) -> Result<Option<Packet>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let deadline = Deadline::after(timeout);
    loop {
        if !scan_for_magic(reader, &deadline).await? {
            return Ok(None);
        }

        let frame = Deadline::after(deadline.remaining().max(frame_grace));
        let mut raw = [0u8; HEADER_LEN];
        raw[..MAGIC.len()].copy_from_slice(&MAGIC);
        if !recv_exact(reader, &mut raw[MAGIC.len()..], INFINITE, &frame).await? {
            return Ok(None);
        }

        let Some(header) = PacketHeader::parse(&raw) else {
            continue;
        };
        if header.payload_len == 0 || header.payload_len > max_payload_len {
            debug!(
                "dropping packet {} with payload length {}",
                header.request_id, header.payload_len
            );
            if deadline.is_expired() {
                return Ok(None);
            }
            continue;
        }

        let mut payload = vec![0u8; header.payload_len as usize];
        if !recv_exact(reader, &mut payload, INFINITE, &frame).await? {
            return Ok(None);
        }

        trace!("received packet {} ({} bytes)", header.request_id, header.payload_len);
        return Ok(Some(Packet::with_payload(header.request_id, &payload)));
    }
}

/// Reads up to and including `ending`, returning the line without it.
async fn read_line<R>(
    reader: &mut R,
    ending: &[u8],
    timeout: Duration,
    max_len: usize,
) -> Result<Option<String>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let deadline = Deadline::after(timeout);
    let mut line = Vec::new();
    while !line.ends_with(ending) {
        if line.len() > max_len {
            return Err(NetError::Malformed(format!("line longer than {} bytes", max_len)));
        }
        let mut byte = [0u8; 1];
        if !recv_exact(reader, &mut byte, INFINITE, &deadline).await? {
            return Ok(None);
        }
        line.push(byte[0]);
    }

    line.truncate(line.len() - ending.len());
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

/// The buffer grows with the data actually received, never ahead of it by
/// more than one chunk.
async fn read_raw<R>(reader: &mut R, len: usize, stall: Duration) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::new();
    let mut chunk = vec![0u8; len.min(RAW_CHUNK_LEN)];
    while buf.len() < len {
        let part = &mut chunk[..(len - buf.len()).min(RAW_CHUNK_LEN)];
        if !recv_exact(reader, part, stall, &Deadline::never()).await? {
            return Ok(None);
        }
        buf.extend_from_slice(part);
    }
    Ok(Some(buf.to_vec()))
}

async fn write_flushed<W>(writer: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Resolves once `closed` reads true.
async fn closed_signal(mut closed: watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[derive(Debug)]
struct State {
    connected: bool,
    stash: StashQueue,
    peer: Option<SocketAddr>,
}

/// A connection over a TCP socket.
///
/// The socket halves sit behind async locks held for the duration of one
/// I/O call. Connection state sits behind a separate lock that is never
/// held across I/O, so [`Connection::disconnect`] can run at any time and
/// a read suspended on the socket wakes up when it does.
pub struct TraditionalConnection {
    config: ConnectionConfig,
    state: Mutex<State>,
    reader: AsyncMutex<Option<BoxedReader>>,
    writer: AsyncMutex<Option<BoxedWriter>>,
    closed: watch::Sender<bool>,
}

impl TraditionalConnection {
    /// A disconnected connection, ready for [`TraditionalConnection::connect_by_name`].
    pub fn new(config: ConnectionConfig) -> Self {
        Self::assemble(config, None, None)
    }

    /// Resolves and connects in one step with the default configuration.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let conn = Self::new(ConnectionConfig::default());
        conn.connect_by_name(host, port, timeout).await?;
        Ok(conn)
    }

    /// Wraps an accepted socket.
    pub fn from_stream(stream: TcpStream, config: ConnectionConfig) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not disable Nagle: {}", e);
        }
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        Self::assemble(
            config,
            Some((BufReader::new(Box::new(read_half)), Box::new(write_half))),
            peer,
        )
    }

    /// Wraps any byte stream, e.g. an in-memory pipe.
    pub fn from_io<S>(io: S, peer: Option<SocketAddr>, config: ConnectionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        Self::assemble(
            config,
            Some((BufReader::new(Box::new(read_half)), Box::new(write_half))),
            peer,
        )
    }

    fn assemble(
        config: ConnectionConfig,
        halves: Option<(BoxedReader, BoxedWriter)>,
        peer: Option<SocketAddr>,
    ) -> Self {
        let connected = halves.is_some();
        let (reader, writer) = match halves {
            Some((reader, writer)) => (Some(reader), Some(writer)),
            None => (None, None),
        };
        let (closed, _) = watch::channel(!connected);

        Self {
            state: Mutex::new(State {
                connected,
                stash: StashQueue::new(config.stash_capacity),
                peer,
            }),
            reader: AsyncMutex::new(reader),
            writer: AsyncMutex::new(writer),
            closed,
            config,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Number of packets waiting in the stash.
    pub fn stashed(&self) -> usize {
        self.state.lock().stash.len()
    }

    /// Resolves `host` and connects to the first address it yields, retrying
    /// transient failures until `timeout` runs out. An open connection is
    /// closed first.
    pub async fn connect_by_name(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        if self.is_connected() {
            self.disconnect();
        }

        let deadline = Deadline::after(timeout);
        let addr = self.resolve(host, port, &deadline).await?;
        let stream = self.connect_to(addr, host, port, &deadline).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not disable Nagle: {}", e);
        }
        let (read_half, write_half) = stream.into_split();

        let mut reader = self.reader.lock().await;
        let mut writer = self.writer.lock().await;
        *reader = Some(BufReader::new(Box::new(read_half)));
        *writer = Some(Box::new(write_half));
        {
            let mut state = self.state.lock();
            state.connected = true;
            state.peer = Some(addr);
            state.stash.clear();
        }
        self.closed.send_replace(false);

        debug!("connected to {}:{} ({})", host, port, addr);
        Ok(())
    }

    async fn resolve(&self, host: &str, port: u16, deadline: &Deadline) -> Result<SocketAddr> {
        let lookup = tokio::time::timeout(deadline.remaining(), lookup_host((host, port)))
            .await
            .map_err(|_| NetError::ConnectTimeout {
                host: host.to_string(),
                port,
            })?;

        let mut addrs = lookup.map_err(|source| NetError::Resolve {
            host: host.to_string(),
            source,
        })?;
        addrs.next().ok_or_else(|| NetError::Resolve {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        })
    }

    async fn connect_to(
        &self,
        addr: SocketAddr,
        host: &str,
        port: u16,
        deadline: &Deadline,
    ) -> Result<TcpStream> {
        let timed_out = || NetError::ConnectTimeout {
            host: host.to_string(),
            port,
        };

        loop {
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return Err(timed_out());
            }

            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()
            } else {
                TcpSocket::new_v6()
            }
            .map_err(NetError::Socket)?;

            match tokio::time::timeout(remaining, socket.connect(addr)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) if is_transient(&e) => {
                    trace!("connect to {} not ready yet: {}", addr, e);
                    tokio::time::sleep(CONNECT_RETRY_DELAY.min(deadline.remaining())).await;
                }
                Ok(Err(source)) => return Err(NetError::Connect { addr, source }),
                Err(_) => return Err(timed_out()),
            }
        }
    }

    /// Writes raw bytes, bypassing packet framing.
    pub async fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }

        let mut guard = self.writer.lock().await;
        let closed = self.closed.subscribe();
        let Some(writer) = guard.as_mut() else {
            return Err(NetError::NotConnected);
        };

        let written = tokio::select! {
            res = write_flushed(writer, bytes) => res.map_err(NetError::Send),
            _ = closed_signal(closed) => Err(NetError::NotConnected),
        };

        // A failed write leaves the connection up; only reads tear it down.
        if !self.is_connected() {
            guard.take();
        }
        written
    }

    /// Reads one line terminated by `ending`, which is not returned.
    /// `Ok(None)` if the line is not complete within `timeout`.
    pub async fn get_line(&self, ending: &str, timeout: Duration) -> Result<Option<String>> {
        let max_len = self.config.max_payload_len as usize;
        let ending = ending.as_bytes();
        let (mut guard, closed) = self.lock_reader().await?;
        let Some(reader) = guard.as_mut() else {
            return Err(NetError::NotConnected);
        };

        let outcome = tokio::select! {
            res = read_line(reader, ending, timeout, max_len) => res,
            _ = closed_signal(closed) => Err(NetError::NotConnected),
        };
        self.finish_read(&mut guard, outcome)
    }

    /// Reads exactly `len` raw bytes. `timeout` bounds each stall, not the
    /// whole transfer.
    pub async fn receive_raw(&self, len: usize, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let (mut guard, closed) = self.lock_reader().await?;
        let Some(reader) = guard.as_mut() else {
            return Err(NetError::NotConnected);
        };

        let outcome = tokio::select! {
            res = read_raw(reader, len, timeout) => res,
            _ = closed_signal(closed) => Err(NetError::NotConnected),
        };
        self.finish_read(&mut guard, outcome)
    }

    async fn receive_packet(&self, timeout: Duration) -> Result<Option<Packet>> {
        let (mut guard, closed) = self.lock_reader().await?;
        let Some(reader) = guard.as_mut() else {
            return Err(NetError::NotConnected);
        };

        let outcome = tokio::select! {
            res = read_packet(
                reader,
                timeout,
                self.config.max_payload_len,
                self.config.frame_grace,
            ) => res,
            _ = closed_signal(closed) => Err(NetError::NotConnected),
        };
        self.finish_read(&mut guard, outcome)
    }

    async fn lock_reader(
        &self,
    ) -> Result<(AsyncMutexGuard<'_, Option<BoxedReader>>, watch::Receiver<bool>)> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }
        let guard = self.reader.lock().await;
        Ok((guard, self.closed.subscribe()))
    }

    /// Tears the connection down after a fatal read and releases the read
    /// half if the connection went away meanwhile.
    fn finish_read<T>(
        &self,
        guard: &mut AsyncMutexGuard<'_, Option<BoxedReader>>,
        outcome: Result<T>,
    ) -> Result<T> {
        if let Err(NetError::Receive(e)) = &outcome {
            debug!("read from {:?} failed: {}", self.peer_addr(), e);
            self.disconnect();
        }
        if !self.is_connected() {
            guard.take();
        }
        outcome
    }

    fn stash(&self, packet: Packet) {
        trace!("stashing packet {}", packet.request_id());
        let evicted = self.state.lock().stash.push(packet);
        if let Some(evicted) = evicted {
            debug!("stash full, dropped packet {}", evicted.request_id());
        }
    }
}

impl Connection for TraditionalConnection {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Traditional
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn disconnect(&self) {
        let peer = {
            let mut state = self.state.lock();
            let was_connected = std::mem::replace(&mut state.connected, false);
            state.stash.clear();
            was_connected.then_some(state.peer)
        };

        self.closed.send_replace(true);
        // Halves that are busy are released by their current user.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }

        if let Some(peer) = peer {
            debug!("disconnected from {:?}", peer);
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.state.lock().peer
    }

    async fn send(&self, packet: &Packet) -> Result<()> {
        trace!("sending packet {} ({} bytes)", packet.request_id(), packet.payload_len());
        self.send_raw(packet.as_bytes()).await
    }

    async fn wait_for_packet(&self, use_stash: bool, timeout: Duration) -> Result<Option<Packet>> {
        if use_stash {
            let stashed = self.state.lock().stash.pop_front();
            if stashed.is_some() {
                return Ok(stashed);
            }
        }
        self.receive_packet(timeout).await
    }

    async fn wait_for_packet_with_id(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> Result<Option<Packet>> {
        let stashed = self.state.lock().stash.take_matching(id);
        if stashed.is_some() {
            return Ok(stashed);
        }

        let deadline = Deadline::after(timeout);
        let polling = timeout.is_zero();
        loop {
            let Some(packet) = self.receive_packet(deadline.remaining()).await? else {
                return Ok(None);
            };
            if id == RequestId::NONE || packet.request_id() == id {
                return Ok(Some(packet));
            }

            self.stash(packet);
            if !polling && deadline.is_expired() {
                return Ok(None);
            }
        }
    }
}

impl Drop for TraditionalConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
