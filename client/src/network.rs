use log::{debug, info};
use shared::{
    Connection, ConnectionConfig, NetError, Packet, RequestId, Result, TraditionalConnection,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Request id used for liveness checks; the lobby protocol leaves it unassigned.
pub const PING_REQUEST: RequestId = RequestId(0x07);

/// Connection to the lobby ("master") server for synchronous requests.
pub struct MasterClient {
    conn: TraditionalConnection,
    timeout: Duration,
    ping_ms: Option<u64>,
}

impl MasterClient {
    /// Connects with the default configuration. `timeout` covers the connect
    /// and every later request.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let config = ConnectionConfig {
            default_timeout: timeout,
            ..ConnectionConfig::default()
        };
        Self::connect_with(host, port, config).await
    }

    /// Connects using `config.default_timeout` as the budget for everything.
    pub async fn connect_with(host: &str, port: u16, config: ConnectionConfig) -> Result<Self> {
        let timeout = config.default_timeout;
        let conn = TraditionalConnection::new(config);
        conn.connect_by_name(host, port, timeout).await?;
        info!("Connected to master server {}:{}", host, port);

        Ok(Self {
            conn,
            timeout,
            ping_ms: None,
        })
    }

    /// Sends `packet` and replaces it with the server's answer.
    pub async fn request(&self, packet: &mut Packet) -> Result<()> {
        self.conn.mreq(packet, self.timeout).await
    }

    /// Round trip of one ping request.
    pub async fn ping(&mut self) -> Result<Duration> {
        let mut packet = Packet::new(PING_REQUEST);
        packet.append("ping");

        let start = Instant::now();
        self.request(&mut packet).await?;
        let rtt = start.elapsed();

        let answer = packet.get_string();
        if answer != "pong" {
            return Err(NetError::Malformed(format!("ping answered with '{}'", answer)));
        }

        self.ping_ms = Some(rtt.as_millis() as u64);
        debug!("ping: {:?}", rtt);
        Ok(rtt)
    }

    /// Last measured round trip, in milliseconds.
    pub fn ping_ms(&self) -> Option<u64> {
        self.ping_ms
    }

    /// Ends the session; returns the server's status byte.
    pub async fn logout(&self, nick: &str) -> Result<u8> {
        let mut packet = Packet::new(RequestId::LOGOUT);
        packet.append(nick);
        self.request(&mut packet).await?;
        Ok(packet.get_u8())
    }

    pub fn disconnect(&self) {
        self.conn.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.conn.peer_addr()
    }

    pub fn connection(&self) -> &TraditionalConnection {
        &self.conn
    }
}
