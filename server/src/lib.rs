//! # Chat Server Library
//!
//! Server side of the text-broadcast chat: every line a participant sends
//! is relayed to all other participants, prefixed with the sender's display
//! name. A connection becomes a participant by sending one handshake line
//! (the name); it leaves by closing the connection.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! The fixed-capacity slot table. Owns the outbound half of every
//! connection, hands out stable indices, and performs broadcast fan-out
//! with per-recipient fault isolation.
//!
//! ### Worker Module (`worker`)
//! Servicing strategy A: one worker task per client, registry shared
//! behind a mutex with narrow critical sections.
//!
//! ### Reactor Module (`reactor`)
//! Servicing strategy B: a single control loop owns the registry with no
//! lock at all, fed readiness events over one channel.
//!
//! Both strategies speak the same wire protocol, enforce the same capacity
//! policy (a rejected connection gets an explicit "Server is full" line),
//! and shut down cooperatively through a shared cancellation token: stop
//! accepting, unblock every in-flight read, close every slot, return.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tokio::net::TcpListener;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind(("0.0.0.0", shared::DEFAULT_PORT)).await?;
//!     let token = CancellationToken::new();
//!     // Cancel `token` (e.g. from a SIGINT handler) to shut down.
//!     server::worker::serve(listener, shared::MAX_CLIENTS, token).await?;
//!     Ok(())
//! }
//! ```

pub mod reactor;
pub mod registry;
pub mod worker;
