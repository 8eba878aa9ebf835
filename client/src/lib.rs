//! # Chat Client Library
//!
//! Companion process for the chat server. After connecting and sending the
//! handshake line (the display name), the client has two channels to watch
//! at once: local standard input, whose lines go to the server, and the
//! server connection, whose lines go to the terminal.
//!
//! The `session` module implements both classic shapes of that problem:
//!
//! - **multiplexed**: a single loop `select!`s over both channels plus the
//!   interrupt signal;
//! - **split**: one task per direction, cross-linked with a cancellation
//!   token so that whichever side finishes first (server gone, stdin EOF,
//!   Ctrl-C) takes the other down with it instead of leaving it blocked.
//!
//! Termination is reported as a [`session::SessionEnd`] so the binary can
//! distinguish a graceful local exit (code 0) from the server disappearing
//! (code 1).

pub mod session;
