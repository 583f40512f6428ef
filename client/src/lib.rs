//! # Lobby Client Library
//!
//! Client side of the lobby protocol. [`network::MasterClient`] keeps one
//! connection to the lobby server and issues synchronous requests over it:
//! each request waits for the answer carrying the same request id, while
//! unrelated packets that arrive in between are stashed on the connection.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::MasterClient;
//! use shared::{Packet, RequestId};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut master = MasterClient::connect("127.0.0.1", 0x4D44, Duration::from_secs(1)).await?;
//!     println!("ping: {:?}", master.ping().await?);
//!
//!     let mut packet = Packet::new(RequestId::FEEDBACK);
//!     packet.append("great game");
//!     master.request(&mut packet).await?;
//!
//!     master.logout("nick").await?;
//!     Ok(())
//! }
//! ```

pub mod network;

pub use network::{MasterClient, PING_REQUEST};
