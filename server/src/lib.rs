//! # Lobby Server Library
//!
//! Accepts TCP connections from game clients and serves each one on its own
//! task. Everything on the wire goes through the `shared` crate's packet and
//! connection types.
//!
//! ## Module Organization
//!
//! ### Listener (`listener`)
//! [`SocketConnectionWaiter`] owns the listening socket. Each call to
//! `wait_for_then_accept` accepts at most one pending connection within a
//! time budget and passes it to a [`ConnectionDispatcher`].
//!
//! ### Client Manager (`client_manager`)
//! [`ClientsManager`] is the dispatcher used by the server binary. It assigns
//! client ids, enforces the client limit and spawns one session task per
//! connection.
//!
//! ### Client (`client`)
//! The per-connection session loop. It answers every valid request on the
//! same connection, acknowledges `LOGOUT` and closes idle connections.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{ClientsManager, SocketConnectionWaiter};
//! use shared::ConnectionConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let clients = ClientsManager::new(64, Duration::from_secs(300));
//!     let mut waiter = SocketConnectionWaiter::new(clients, ConnectionConfig::default());
//!     waiter.init(0x4D44).await?;
//!
//!     // Serve until Ctrl+C.
//!     waiter
//!         .accept_until(Duration::from_millis(500), async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!     waiter.deinit();
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod client_manager;
pub mod listener;

pub use client::{Client, SessionEnd};
pub use client_manager::ClientsManager;
pub use listener::{ConnectionDispatcher, SocketConnectionWaiter};

/// Port the lobby server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 0x4D44;
