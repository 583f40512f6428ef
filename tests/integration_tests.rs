//! Integration tests for the lobby protocol stack
//!
//! These tests run real TCP connections over loopback between the server
//! crate's listener and the shared connection layer.

use assert_approx_eq::assert_approx_eq;
use client::MasterClient;
use serde::{Deserialize, Serialize};
use server::{ClientsManager, ConnectionDispatcher, SocketConnectionWaiter};
use shared::{
    Connection, ConnectionConfig, NetError, Packet, RequestId, TraditionalConnection, INFINITE,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Starts a lobby server on a free loopback port and keeps it accepting.
async fn start_lobby(idle_timeout: Duration) -> (Arc<SocketConnectionWaiter<ClientsManager>>, u16) {
    let clients = ClientsManager::new(16, idle_timeout);
    let mut waiter = SocketConnectionWaiter::new(clients, ConnectionConfig::default());
    waiter.init_on("127.0.0.1", 0).await.unwrap();
    let port = waiter.local_addr().unwrap().port();

    let waiter = Arc::new(waiter);
    let accepting = Arc::clone(&waiter);
    tokio::spawn(async move {
        accepting
            .accept_until(Duration::from_millis(50), std::future::pending())
            .await
    });
    (waiter, port)
}

/// Listener whose dispatcher hands raw server-side connections to the test.
async fn start_raw() -> (
    SocketConnectionWaiter<impl ConnectionDispatcher>,
    mpsc::UnboundedReceiver<TraditionalConnection>,
    u16,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = move |conn: TraditionalConnection| {
        let _ = tx.send(conn);
    };
    let mut waiter = SocketConnectionWaiter::new(dispatcher, ConnectionConfig::default());
    waiter.init_on("127.0.0.1", 0).await.unwrap();
    let port = waiter.local_addr().unwrap().port();
    (waiter, rx, port)
}

/// REQUEST/RESPONSE TESTS
mod mreq_tests {
    use super::*;

    /// Tests the ping scenario: id 7 with "ping" is answered with "pong"
    #[tokio::test]
    async fn ping_pong_over_loopback() {
        let (_lobby, port) = start_lobby(Duration::from_secs(5)).await;
        let conn = TraditionalConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();

        let mut request = Packet::new(RequestId(7));
        request.append("ping");

        let start = Instant::now();
        conn.mreq(&mut request, Duration::from_secs(1)).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));

        assert_eq!(request.request_id(), RequestId(7));
        assert_eq!(request.get_string(), "pong");
    }

    /// Tests that a reserved id fails without any traffic reaching the peer
    #[tokio::test]
    async fn mreq_with_none_fails_immediately() {
        let (waiter, mut accepted, port) = start_raw().await;
        let client = TraditionalConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(waiter.wait_for_then_accept(Duration::from_secs(1)).await);
        let server_side = accepted.recv().await.unwrap();

        let mut request = Packet::new(RequestId::NONE);
        request.append("anything");
        let result = client.mreq(&mut request, INFINITE).await;
        assert!(matches!(result, Err(NetError::InvalidRequest(id)) if id == RequestId::NONE));

        let nothing = server_side
            .wait_for_packet(false, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(nothing.is_none());
    }

    /// Tests that packets for other ids arriving before the response are kept
    #[tokio::test]
    async fn unrelated_packets_survive_mreq() {
        let (waiter, mut accepted, port) = start_raw().await;
        let client = TraditionalConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(waiter.wait_for_then_accept(Duration::from_secs(1)).await);
        let server_side = accepted.recv().await.unwrap();

        let responder = tokio::spawn(async move {
            let mut request = server_side
                .wait_for_packet_with_id(RequestId::GAME_LST, Duration::from_secs(1))
                .await
                .unwrap()
                .unwrap();
            let asked = request.get_string();

            let mut chat = Packet::new(RequestId::CHAT_GETMSG);
            chat.append("bob").append("hi all");
            server_side.send(&chat).await.unwrap();

            let mut list = Packet::new(RequestId::GAME_LST);
            list.append(2u8).append(format!("{}-1", asked)).append(format!("{}-2", asked));
            server_side.send(&list).await.unwrap();
            server_side
        });

        let mut request = Packet::new(RequestId::GAME_LST);
        request.append("arena");
        client.mreq(&mut request, Duration::from_secs(1)).await.unwrap();
        let _server_side = responder.await.unwrap();

        assert_eq!(request.get_u8(), 2);
        assert_eq!(request.get_string(), "arena-1");
        assert_eq!(request.get_string(), "arena-2");

        let mut chat = client
            .get_packet_with_id_if_present(RequestId::CHAT_GETMSG)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chat.get_string(), "bob");
        assert_eq!(chat.get_string(), "hi all");
    }

    /// Tests that an unanswered request times out without disconnecting
    #[tokio::test]
    async fn mreq_timeout_keeps_connection() {
        let (waiter, mut accepted, port) = start_raw().await;
        let client = TraditionalConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(waiter.wait_for_then_accept(Duration::from_secs(1)).await);
        let _server_side = accepted.recv().await.unwrap();

        let mut request = Packet::new(RequestId::LOGIN);
        request.append("nick");
        let result = client.mreq(&mut request, Duration::from_millis(50)).await;

        assert!(matches!(result, Err(NetError::Timeout)));
        assert!(client.is_connected());
        assert_eq!(request.get_string(), "nick");
    }
}

/// TIMEOUT TESTS
mod timeout_tests {
    use super::*;

    /// Tests that a silent peer makes wait_for_packet return None after the budget
    #[tokio::test]
    async fn silent_client_times_out_after_budget() {
        let (waiter, mut accepted, port) = start_raw().await;
        let _client = TraditionalConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(waiter.wait_for_then_accept(Duration::from_secs(1)).await);
        let server_side = accepted.recv().await.unwrap();

        let start = Instant::now();
        let packet = server_side
            .wait_for_packet(true, Duration::from_millis(50))
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(packet.is_none());
        assert!(elapsed >= Duration::from_millis(50));
        assert_approx_eq!(elapsed.as_secs_f64(), 0.05, 0.1);
        assert!(server_side.is_connected());
    }

    /// Tests that polling returns at once when nothing is pending
    #[tokio::test]
    async fn poll_does_not_block() {
        let (waiter, mut accepted, port) = start_raw().await;
        let _client = TraditionalConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(waiter.wait_for_then_accept(Duration::from_secs(1)).await);
        let server_side = accepted.recv().await.unwrap();

        let start = Instant::now();
        assert!(server_side.get_packet_if_present(true).await.unwrap().is_none());
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    /// Tests that the idle timeout of the lobby closes silent sessions
    #[tokio::test]
    async fn lobby_drops_idle_sessions() {
        let (lobby, port) = start_lobby(Duration::from_millis(50)).await;
        let client = TraditionalConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();

        let outcome = client.wait_for_packet(false, Duration::from_secs(2)).await;
        assert!(matches!(outcome, Err(NetError::Receive(_))));
        assert!(!client.is_connected());

        for _ in 0..100 {
            if lobby.dispatcher().client_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(lobby.dispatcher().client_count(), 0);
    }
}

/// CONNECTION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Tests that the lobby tracks each session and forgets it on logout
    #[tokio::test]
    async fn lobby_tracks_sessions() {
        let (lobby, port) = start_lobby(Duration::from_secs(5)).await;
        let first = TraditionalConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        let second = TraditionalConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();

        for conn in [&first, &second] {
            let mut hello = Packet::new(RequestId::FEEDBACK);
            hello.append("hello");
            conn.mreq(&mut hello, Duration::from_secs(1)).await.unwrap();
        }
        assert_eq!(lobby.dispatcher().client_count(), 2);

        let mut logout = Packet::new(RequestId::LOGOUT);
        logout.append("first");
        first.mreq(&mut logout, Duration::from_secs(1)).await.unwrap();
        assert_eq!(logout.get_u8(), 0);

        for _ in 0..100 {
            if lobby.dispatcher().client_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(lobby.dispatcher().client_count(), 1);
    }

    /// Tests the client crate's wrapper against the lobby
    #[tokio::test]
    async fn master_client_session() {
        let (lobby, port) = start_lobby(Duration::from_secs(5)).await;
        let mut master = MasterClient::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();

        for _ in 0..3 {
            master.ping().await.unwrap();
        }
        assert!(master.ping_ms().unwrap() < 1000);
        assert_eq!(lobby.dispatcher().client_count(), 1);

        assert_eq!(master.logout("tester").await.unwrap(), 0);
        master.disconnect();
        assert!(!master.is_connected());
    }

    /// Tests that disconnect from another task unblocks an infinite wait
    #[tokio::test]
    async fn disconnect_unblocks_infinite_wait() {
        let (waiter, mut accepted, port) = start_raw().await;
        let _client = TraditionalConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(waiter.wait_for_then_accept(Duration::from_secs(1)).await);
        let server_side = Arc::new(accepted.recv().await.unwrap());

        let waiting = {
            let conn = Arc::clone(&server_side);
            tokio::spawn(async move { conn.wait_for_packet(false, INFINITE).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        server_side.disconnect();
        server_side.disconnect();

        let outcome = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("pending read must return after disconnect")
            .unwrap();
        assert!(matches!(outcome, Err(NetError::NotConnected)));
    }

    /// Tests that a dropped connection is reusable after connect_by_name
    #[tokio::test]
    async fn reconnect_after_disconnect() {
        let (_lobby, port) = start_lobby(Duration::from_secs(5)).await;
        let conn = TraditionalConnection::new(ConnectionConfig::default());

        conn.connect_by_name("127.0.0.1", port, Duration::from_secs(1)).await.unwrap();
        conn.disconnect();
        assert!(!conn.is_connected());

        let mut request = Packet::new(RequestId(7));
        request.append("ping");
        assert!(matches!(
            conn.mreq(&mut request, Duration::from_secs(1)).await,
            Err(NetError::NotConnected)
        ));

        conn.connect_by_name("127.0.0.1", port, Duration::from_secs(1)).await.unwrap();
        conn.mreq(&mut request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(request.get_string(), "pong");
    }
}

/// PAYLOAD TESTS
mod payload_tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct PlayerInfo {
        nick: String,
        wins: u32,
        flags: Vec<u8>,
        location: Option<(f32, f32)>,
    }

    /// Tests that serde structs travel inside packets across the wire
    #[tokio::test]
    async fn struct_payload_over_loopback() {
        let (_lobby, port) = start_lobby(Duration::from_secs(5)).await;
        let conn = TraditionalConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();

        let info = PlayerInfo {
            nick: "Pompei".to_string(),
            wins: 12,
            flags: vec![1, 0, 1],
            location: Some((1.5, -3.0)),
        };
        let mut request = Packet::new(RequestId::PLAYER_SET);
        request.append("Pompei").append_struct(&info).unwrap();
        conn.mreq(&mut request, Duration::from_secs(1)).await.unwrap();

        assert_eq!(request.get_string(), "Pompei");
        assert_eq!(request.get_struct::<PlayerInfo>(), Some(info));
        assert_eq!(request.remaining(), 0);
    }

    /// Tests relaying a packet nested inside another one
    #[tokio::test]
    async fn nested_packet_over_loopback() {
        let (_lobby, port) = start_lobby(Duration::from_secs(5)).await;
        let conn = TraditionalConnection::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();

        let mut inner = Packet::new(RequestId::CHAT_SENDMSG);
        inner.append("#fts").append("nested hello");

        let mut outer = Packet::new(RequestId::FEEDBACK);
        inner.write_nested(&mut outer);
        conn.mreq(&mut outer, Duration::from_secs(1)).await.unwrap();

        let mut relayed = Packet::read_nested(&mut outer);
        assert!(relayed.is_valid());
        assert_eq!(relayed.request_id(), RequestId::CHAT_SENDMSG);
        assert_eq!(relayed.get_string(), "#fts");
        assert_eq!(relayed.get_string(), "nested hello");
    }
}
