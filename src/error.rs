//! Core error taxonomy.
//!
//! Every failure the reactor can report to a client falls into one of
//! five buckets (protocol framing, auth, state, resource, repository).
//! `CoreError::category()` exposes the bucket for structured logging;
//! `message()` is the exact string sent back on the wire.

use thiserror::Error;

/// The five-way error classification used to tag outgoing error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or oversized wire data.
    Protocol,
    /// Missing, invalid, or expired credentials.
    Auth,
    /// Request is well-formed but invalid given current state.
    State,
    /// A capacity limit was reached.
    Resource,
    /// The backing repository failed.
    Repository,
}

/// Unified error type returned by every core component.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A line exceeded the maximum frame size or was not valid UTF-8/JSON.
    #[error("message too large or malformed")]
    ProtocolViolation,

    /// `token` was missing, unknown, or expired.
    #[error("invalid or expired session token")]
    InvalidToken,

    /// Username already registered.
    #[error("username already taken")]
    UsernameTaken,

    /// Username/password did not match a known account.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Caller already has an active match and may not queue for another.
    #[error("already in an active match")]
    AlreadyInMatch,

    /// Caller is not currently a participant in the referenced match.
    #[error("not a participant in this match")]
    NotInMatch,

    /// It is not the caller's turn to move.
    #[error("not your turn")]
    NotYourTurn,

    /// The match has already ended.
    #[error("match has already ended")]
    MatchEnded,

    /// The referenced match does not exist.
    #[error("no such match")]
    NoSuchMatch,

    /// The referenced room does not exist.
    #[error("no such room")]
    NoSuchRoom,

    /// Room password did not match.
    #[error("incorrect room password")]
    WrongPassword,

    /// Only the room host may perform this action.
    #[error("only the host may do that")]
    NotHost,

    /// The room is not in a state that allows this action.
    #[error("room is not open")]
    RoomNotOpen,

    /// The referenced challenge does not exist or is no longer pending.
    #[error("no such pending challenge")]
    NoSuchChallenge,

    /// Caller tried to accept or decline a challenge addressed to someone else.
    #[error("that challenge was not sent to you")]
    NotChallengeRecipient,

    /// A move's coordinates were out of board bounds or degenerate.
    #[error("invalid move coordinates")]
    InvalidMove,

    /// The match has reached the move-count cap.
    #[error("match reached maximum move count")]
    MoveLimitReached,

    /// Ready list, room table, challenge table, or session table is full.
    #[error("server is at capacity, try again shortly")]
    CapacityExceeded,

    /// Spectator set for a match is full.
    #[error("match is not accepting more spectators")]
    SpectatorsFull,

    /// The repository backing user/match persistence failed.
    #[error("repository error: {0}")]
    Repository(String),
}

impl CoreError {
    /// The bucket this error belongs to, used only for structured log fields.
    pub fn category(&self) -> ErrorCategory {
        use CoreError::*;
        match self {
            ProtocolViolation => ErrorCategory::Protocol,
            InvalidToken | InvalidCredentials => ErrorCategory::Auth,
            UsernameTaken
            | AlreadyInMatch
            | NotInMatch
            | NotYourTurn
            | MatchEnded
            | NoSuchMatch
            | NoSuchRoom
            | WrongPassword
            | NotHost
            | RoomNotOpen
            | NoSuchChallenge
            | NotChallengeRecipient
            | InvalidMove
            | MoveLimitReached => ErrorCategory::State,
            CapacityExceeded | SpectatorsFull => ErrorCategory::Resource,
            Repository(_) => ErrorCategory::Repository,
        }
    }

    /// The exact text placed in the wire `message` field.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_buckets_match_taxonomy() {
        assert_eq!(CoreError::ProtocolViolation.category(), ErrorCategory::Protocol);
        assert_eq!(CoreError::InvalidToken.category(), ErrorCategory::Auth);
        assert_eq!(CoreError::NotYourTurn.category(), ErrorCategory::State);
        assert_eq!(CoreError::CapacityExceeded.category(), ErrorCategory::Resource);
        assert_eq!(
            CoreError::Repository("timeout".into()).category(),
            ErrorCategory::Repository
        );
    }

    #[test]
    fn message_matches_display() {
        let err = CoreError::WrongPassword;
        assert_eq!(err.message(), "incorrect room password");
    }
}
