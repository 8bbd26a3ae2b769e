//! Server configuration.
//!
//! All of the historical fixed-array sizes from the original C server
//! (`MAX_SESSIONS`, `MAX_SPECTATORS_PER_MATCH`, ...) live here as plain
//! fields instead of compile-time constants, so a deployment can tune
//! them without a rebuild.

use std::net::SocketAddr;
use std::time::Duration;

/// Top-level server configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the TCP listener on.
    pub bind_addr: SocketAddr,
    /// Maximum size of a single newline-delimited frame, in bytes.
    pub max_frame_bytes: usize,
    /// Elo K-factor used by the rating engine.
    pub k_factor: i32,
    /// Starting clock allotment for a new match, per side.
    pub initial_clock_ms: u64,
    /// Connection string for the backing relational store. Unused by
    /// the bundled `InMemoryRepository`; read here so a real
    /// `Repository` implementation can be wired up from the same
    /// configuration surface without a second env-parsing pass.
    pub db_url: Option<String>,
    /// Session store configuration.
    pub session: SessionStoreConfig,
    /// Lobby configuration.
    pub lobby: LobbyConfig,
    /// Match manager configuration.
    pub match_manager: MatchManagerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7777".parse().unwrap(),
            max_frame_bytes: 16 * 1024,
            k_factor: 32,
            initial_clock_ms: 10 * 60 * 1000,
            db_url: None,
            session: SessionStoreConfig::default(),
            lobby: LobbyConfig::default(),
            match_manager: MatchManagerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("XIANGQI_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.bind_addr.set_port(port);
            }
        }
        if let Ok(k) = std::env::var("XIANGQI_K_FACTOR") {
            if let Ok(k) = k.parse::<i32>() {
                config.k_factor = k;
            }
        }
        if let Ok(clock) = std::env::var("XIANGQI_INITIAL_CLOCK_MS") {
            if let Ok(clock) = clock.parse::<u64>() {
                config.initial_clock_ms = clock;
            }
        }
        if let Ok(db_url) = std::env::var("XIANGQI_DB_URL") {
            config.db_url = Some(db_url);
        }

        config
    }
}

/// Session store tuning.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Maximum concurrent sessions before a sweep is forced.
    pub capacity: usize,
    /// Time since last activity after which a session is considered stale.
    pub ttl: Duration,
    /// How often the reactor invokes `SessionStore::sweep`.
    pub sweep_interval: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Lobby tuning.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Maximum simultaneous ready-list entries.
    pub max_ready: usize,
    /// Rating tolerance window for rated matchmaking.
    pub rating_tolerance: i32,
    /// Seconds before a pending challenge expires.
    pub challenge_ttl: Duration,
    /// How often the reactor sweeps expired challenges.
    pub challenge_sweep_interval: Duration,
    /// Maximum simultaneously open rooms.
    pub max_rooms: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            max_ready: 128,
            rating_tolerance: 200,
            challenge_ttl: Duration::from_secs(60),
            challenge_sweep_interval: Duration::from_secs(5),
            max_rooms: 256,
        }
    }
}

/// Match manager tuning.
#[derive(Debug, Clone)]
pub struct MatchManagerConfig {
    /// Maximum live matches tracked at once.
    pub max_matches: usize,
    /// Maximum spectators per match.
    pub max_spectators: usize,
    /// Maximum moves before a match is forced to a draw.
    pub max_moves: u32,
    /// How often the reactor sweeps match clocks for timeouts.
    pub clock_sweep_interval: Duration,
}

impl Default for MatchManagerConfig {
    fn default() -> Self {
        Self {
            max_matches: 500,
            max_spectators: 64,
            max_moves: 300,
            clock_sweep_interval: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_original_constants() {
        let config = ServerConfig::default();
        assert_eq!(config.max_frame_bytes, 16 * 1024);
        assert_eq!(config.session.capacity, 1000);
        assert_eq!(config.lobby.max_ready, 128);
        assert_eq!(config.match_manager.max_matches, 500);
        assert_eq!(config.match_manager.max_spectators, 64);
        assert_eq!(config.match_manager.max_moves, 300);
        assert_eq!(config.k_factor, 32);
    }

    #[test]
    fn from_env_overrides_port() {
        std::env::set_var("XIANGQI_PORT", "9999");
        let config = ServerConfig::from_env();
        assert_eq!(config.bind_addr.port(), 9999);
        std::env::remove_var("XIANGQI_PORT");
    }
}
