//! # Game Server Library
//!
//! This library provides the authoritative server implementation for a fast-paced
//! networked multiplayer game. It owns the canonical state of every client
//! connection, validates everything a client sends, and feeds accepted input
//! into a pluggable simulation.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! Clients pass through a strict state machine on their way into the world:
//! a challenge handshake over out-of-band packets, a connect negotiation,
//! a full gamestate transfer, and finally the first movement command that
//! flips them live. Every transition is driven by this crate; the simulation
//! only ever sees fully validated clients.
//!
//! ### Reliable Command Delivery
//! Server-to-client commands (configstring changes, chat, disconnect notices)
//! ride a per-client ring of reliable commands that is retransmitted with
//! every outgoing message until acknowledged. Clients that fall too far
//! behind are resynchronized or dropped.
//!
//! ### Content Distribution
//! Missing pak files are served in-band through a windowed block protocol
//! with rate limiting, or redirected to an HTTP mirror when both sides
//! support it, with automatic fallback to the direct path when the mirror
//! fails.
//!
//! ### Content Validation
//! On pure servers each client has to prove, after every gamestate, that
//! its loaded paks match the server's before its movement is accepted.
//!
//! ## Architecture Design
//!
//! The server runs a single-threaded, event-driven loop: inbound datagrams,
//! operator console lines and the fixed simulation tick are multiplexed on
//! one task, which eliminates locking around client state. Dedicated tasks
//! handle raw socket reads and writes and communicate with the loop through
//! unbounded channels.

pub mod challenge;
pub mod commands;
pub mod config;
pub mod console;
pub mod download;
pub mod game;
pub mod message;
pub mod network;
pub mod pure;
pub mod session;
pub mod snapshot;
