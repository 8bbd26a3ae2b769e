//! # Xiangqi Online Server
//!
//! Authoritative session server for multiplayer Xiangqi (Chinese chess).
//! The server tracks accounts, presence, matchmaking, and match state;
//! it does not referee piece movement, which both clients are trusted
//! to enforce identically.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    XIANGQI ONLINE SERVER                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  session.rs        - Bearer token issuance and TTL expiry    │
//! │  presence.rs       - user_id -> live connection mapping      │
//! │  lobby.rs          - Ready list, rooms, challenges           │
//! │  match_manager.rs  - Live match state, clocks, spectators    │
//! │  rating.rs         - Pure Elo rating engine                  │
//! │  repo.rs           - Account/match persistence boundary      │
//! │  core.rs           - Orchestrates the above into one server  │
//! │                                                              │
//! │  protocol.rs       - Newline-delimited JSON wire format      │
//! │  dispatch.rs        - Routes requests to `Core` methods      │
//! │  server.rs         - TCP reactor and background sweeps       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scope
//!
//! Turn order, clocks, resignation, draws, rematches, matchmaking, and
//! rating are all authoritative here. Whether a given piece may legally
//! travel from one square to another is not: that is left to the
//! client.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod lobby;
pub mod match_manager;
pub mod presence;
pub mod protocol;
pub mod rating;
pub mod repo;
pub mod server;
pub mod session;
pub mod types;

pub use config::ServerConfig;
pub use core::Core;
pub use error::CoreError;
pub use server::Server;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Board dimensions: 9 files, 10 ranks.
pub const BOARD_FILES: u8 = match_manager::BOARD_FILES;
/// Board dimensions: 9 files, 10 ranks.
pub const BOARD_RANKS: u8 = match_manager::BOARD_RANKS;
