//! # Relay Server Library
//!
//! The relay is the stateful pub/sub hub of the proximity-buff system. It is
//! the single source of truth for "who is where": detector clients push their
//! minimap positions over UDP, the relay upserts them into an authoritative
//! position store, and every mutation fans out as a full-snapshot broadcast
//! so all clients converge on the same peer view. Calibration regions travel
//! over the same socket as an out-of-band side channel.
//!
//! ## Architecture
//!
//! A single event loop owns all state transitions. Background tasks handle
//! the slow edges:
//! - **Receiver**: deserializes datagrams and forwards them to the loop
//! - **Sender**: drains an outbound queue so the loop never awaits socket I/O
//! - **Timeout checker**: prunes peers that have gone silent
//!
//! Because only the event loop mutates the registry, connect, disconnect, and
//! position updates appear atomic; broadcast enumeration works on
//! point-in-time address copies and therefore tolerates concurrent removals.
//!
//! ## Ordering guarantees
//!
//! Snapshots are eventually consistent: a client may briefly observe a stale
//! snapshot during rapid updates, but every delivered snapshot is a complete
//! valid state at some point in relay history, never a partial one. All state
//! is in-memory and resets on restart.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use relay::network::Relay;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut relay = Relay::new("127.0.0.1:5000", 32).await?;
//!     relay.run().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod registry;
