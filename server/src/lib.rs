//! # Audience Broadcast Server Library
//!
//! This library provides the server side of audience-based broadcasting: who
//! receives a message, and how that message reaches them with as little work
//! as possible.
//!
//! ## Core Responsibilities
//!
//! ### Audience Resolution
//! Messages are addressed to audiences rather than to individual clients.
//! An audience is every connected player, the operator console, a named
//! custom group, or a filtered or combined view over those. Live audiences
//! resolve their members at the moment a message is sent.
//!
//! ### Grouped Delivery
//! A message sent to an audience is encoded once and the resulting buffer is
//! shared by every target connection. Delivery failures for one connection
//! are reported to a fault handler and never interrupt the others.
//!
//! ### Boss Bar Synchronization
//! Boss bars are mutable overlays shown to a changing set of viewers. Each
//! mutation produces the single minimal update packet for it, sent only to
//! the bar's current viewers; new viewers get the full current state.
//!
//! ## Module Organization
//!
//! ### Recipient Module (`recipient`)
//! Players, the console, and the connection handles packets are queued on.
//!
//! ### Directory Module (`directory`)
//! Connected players: capacity, lookup by address, timeout sweeps, and
//! live or snapshot views.
//!
//! ### Registry Module (`registry`)
//! Named custom groups of recipients.
//!
//! ### Audience Module (`audience`)
//! The standard audiences built from the directory, the console and the
//! registry.
//!
//! ### Grouping Module (`grouping`)
//! Encode-once delivery and the audience operations built on it.
//!
//! ### Boss Bar Module (`bossbar`)
//! Bar state, change descriptors, and the manager that keeps viewers in sync.
//!
//! ### Game Module (`game`)
//! The lobby countdown that drives bars, titles, sounds and chat.
//!
//! ### Network Module (`network`)
//! The UDP server loop tying everything together.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:8080", ServerOptions::default()).await?;
//!
//!     // Runs until the process is stopped:
//!     // - Accepts connections and adds players to the lobby group
//!     // - Advances the lobby countdown every tick
//!     // - Drains the shared outbound queue onto the socket
//!     // - Disconnects clients that stop sending heartbeats
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod audience;
pub mod bossbar;
pub mod directory;
pub mod fault;
pub mod game;
pub mod grouping;
pub mod network;
pub mod recipient;
pub mod registry;
