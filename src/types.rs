//! Shared domain types used across the lobby, match manager, and wire
//! protocol: identifiers, the board's color/result enums, and the
//! read-only summary shapes returned by profile/history/timer queries.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque account identifier.
pub type UserId = Uuid;
/// Opaque match identifier.
pub type MatchId = Uuid;
/// Opaque challenge identifier.
pub type ChallengeId = Uuid;

/// Which side a player controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    /// Moves first.
    Red,
    /// Moves second.
    Black,
}

impl Color {
    /// The other color.
    pub fn opposite(self) -> Color {
        match self {
            Color::Red => Color::Black,
            Color::Black => Color::Red,
        }
    }
}

/// Terminal outcome of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    /// Red won.
    RedWins,
    /// Black won.
    BlackWins,
    /// Drawn by agreement or move-limit.
    Draw,
    /// Allocated but never actually started — a pairing fell through
    /// before both sides could be notified. Carries no rating impact.
    Aborted,
}

impl MatchResult {
    /// The result corresponding to `color` winning.
    pub fn wins_for(color: Color) -> MatchResult {
        match color {
            Color::Red => MatchResult::RedWins,
            Color::Black => MatchResult::BlackWins,
        }
    }

    /// Whether `color` was the winner of this result.
    pub fn winner(self) -> Option<Color> {
        match self {
            MatchResult::RedWins => Some(Color::Red),
            MatchResult::BlackWins => Some(Color::Black),
            MatchResult::Draw | MatchResult::Aborted => None,
        }
    }
}

/// Why a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A player resigned.
    #[serde(rename = "resign")]
    Resignation,
    /// Both players agreed to a draw.
    #[serde(rename = "agreement")]
    DrawAgreed,
    /// One side's clock reached zero.
    Timeout,
    /// The move cap was reached.
    MoveLimit,
    /// The pairing was rolled back because one side could not be
    /// notified (its presence connection disappeared between queue
    /// scan and notify).
    NotifyFailed,
}

/// A single accepted move, recorded for history/replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Move {
    /// 0-based move index within the match.
    pub index: u32,
    /// Which color made the move.
    pub color: Color,
    /// Source square in `file,rank` form, e.g. `"0,0"`.
    pub from: (u8, u8),
    /// Destination square.
    pub to: (u8, u8),
    /// Milliseconds on the mover's clock immediately after the debit.
    pub clock_ms_after: u64,
}

/// Aggregate account record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Stable account identifier.
    pub id: UserId,
    /// Display name, unique across the server.
    pub username: String,
    /// Opaque credential handle (already hashed by the caller; the core
    /// never hashes or verifies passwords itself).
    pub password_hash: String,
    /// Current Elo rating.
    pub rating: i32,
    /// Rated wins.
    pub wins: u32,
    /// Rated losses.
    pub losses: u32,
    /// Rated draws.
    pub draws: u32,
}

impl User {
    /// Default starting rating for a newly registered account.
    pub const DEFAULT_RATING: i32 = 1200;
}

/// Public profile view returned by `get_profile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    /// Account identifier.
    pub user_id: UserId,
    /// Display name.
    pub username: String,
    /// Current Elo rating.
    pub rating: i32,
    /// Rated wins.
    pub wins: u32,
    /// Rated losses.
    pub losses: u32,
    /// Rated draws.
    pub draws: u32,
}

impl From<&User> for UserProfile {
    fn from(u: &User) -> Self {
        UserProfile {
            user_id: u.id,
            username: u.username.clone(),
            rating: u.rating,
            wins: u.wins,
            losses: u.losses,
            draws: u.draws,
        }
    }
}

/// One row of a match-history listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSummary {
    /// Identifier of the match.
    pub match_id: MatchId,
    /// Opponent's display name.
    pub opponent: String,
    /// Which color the requesting user played.
    pub color: Color,
    /// How the match ended, if it has.
    pub result: Option<MatchResult>,
    /// Whether the match was rated.
    pub rated: bool,
    /// Unix millisecond timestamp the match ended, if it has.
    pub ended_at: Option<i64>,
}

/// Snapshot of both clocks for `get_timer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSnapshot {
    /// Identifier of the match.
    pub match_id: MatchId,
    /// Milliseconds remaining for red.
    pub red_clock_ms: u64,
    /// Milliseconds remaining for black.
    pub black_clock_ms: u64,
    /// Whose turn it currently is.
    pub current_turn: Color,
    /// Whether the match is still in progress.
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_color_round_trips() {
        assert_eq!(Color::Red.opposite(), Color::Black);
        assert_eq!(Color::Black.opposite(), Color::Red);
    }

    #[test]
    fn wins_for_maps_correctly() {
        assert_eq!(MatchResult::wins_for(Color::Red), MatchResult::RedWins);
        assert_eq!(MatchResult::wins_for(Color::Black), MatchResult::BlackWins);
    }

    #[test]
    fn winner_extracts_color_or_none() {
        assert_eq!(MatchResult::RedWins.winner(), Some(Color::Red));
        assert_eq!(MatchResult::BlackWins.winner(), Some(Color::Black));
        assert_eq!(MatchResult::Draw.winner(), None);
    }

    #[test]
    fn color_serializes_snake_case() {
        let json = serde_json::to_string(&Color::Red).unwrap();
        assert_eq!(json, "\"red\"");
        let json = serde_json::to_string(&MatchResult::RedWins).unwrap();
        assert_eq!(json, "\"red_wins\"");
    }
}
