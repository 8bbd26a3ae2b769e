//! Match Manager: authoritative match state, turn enforcement, clocks,
//! resignation, draws, rematches, and spectators.
//!
//! Piece-level legality is explicitly out of scope here (and for the
//! whole crate): `apply_move` only checks that the coordinates are on
//! the board, that `from != to`, that the mover owns the match and the
//! turn, and that the match is still active. Everything about whether
//! a given piece can legally travel from `from` to `to` is the client's
//! job, enforced independently by both participants' clients.

use std::collections::BTreeMap;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::config::MatchManagerConfig;
use crate::error::CoreError;
use crate::types::{Color, EndReason, MatchId, MatchResult, Move, UserId};

/// Board dimensions: 9 files, 10 ranks.
pub const BOARD_FILES: u8 = 9;
pub const BOARD_RANKS: u8 = 10;

/// Outcome of a match reaching a terminal state.
#[derive(Debug, Clone, Copy)]
pub struct MatchEndOutcome {
    /// Final result.
    pub result: MatchResult,
    /// Why the match ended.
    pub reason: EndReason,
}

/// Outcome of a single accepted move.
#[derive(Debug, Clone, Copy)]
pub struct MoveOutcome {
    /// Who just moved.
    pub mover_color: Color,
    /// The mover's clock immediately after the time debit.
    pub clock_ms_after: u64,
    /// Set if this move ended the match (timeout on debit, or move cap).
    pub ended: Option<MatchEndOutcome>,
}

/// A live or finished match.
#[derive(Debug, Clone)]
pub struct Match {
    /// Match identifier.
    pub id: MatchId,
    /// Red player.
    pub red: UserId,
    /// Red's display name.
    pub red_username: String,
    /// Black player.
    pub black: UserId,
    /// Black's display name.
    pub black_username: String,
    /// Whether this match affects ratings.
    pub rated: bool,
    /// Whose turn it currently is.
    pub current_turn: Color,
    /// Accepted moves so far.
    pub moves: Vec<Move>,
    /// Red's remaining clock, in milliseconds.
    pub red_clock_ms: u64,
    /// Black's remaining clock, in milliseconds.
    pub black_clock_ms: u64,
    /// When the current turn's clock started running.
    pub last_move_at: Instant,
    /// Whether the match is still in progress.
    pub active: bool,
    /// Final result, once decided.
    pub result: Option<MatchResult>,
    /// Why the match ended, once decided.
    pub end_reason: Option<EndReason>,
    /// Color that most recently offered a draw, if any offer is outstanding.
    pub draw_offered_by: Option<Color>,
    /// Color that requested a rematch after this match ended, if any.
    pub rematch_requested_by: Option<Color>,
    /// Spectating users, bounded by `MatchManagerConfig::max_spectators`.
    pub spectators: Vec<UserId>,
}

impl Match {
    /// The color `user_id` plays, if they are a participant.
    pub fn color_of(&self, user_id: UserId) -> Option<Color> {
        if user_id == self.red {
            Some(Color::Red)
        } else if user_id == self.black {
            Some(Color::Black)
        } else {
            None
        }
    }

    /// Username of the color's occupant.
    pub fn username_of(&self, color: Color) -> &str {
        match color {
            Color::Red => &self.red_username,
            Color::Black => &self.black_username,
        }
    }

    /// Remaining clock for `color`, in milliseconds.
    pub fn clock_of(&self, color: Color) -> u64 {
        match color {
            Color::Red => self.red_clock_ms,
            Color::Black => self.black_clock_ms,
        }
    }

    fn set_clock(&mut self, color: Color, ms: u64) {
        match color {
            Color::Red => self.red_clock_ms = ms,
            Color::Black => self.black_clock_ms = ms,
        }
    }
}

/// `square` is `(row, col)`; a board position is valid iff
/// `row ∈ 0..BOARD_RANKS(10)` and `col ∈ 0..BOARD_FILES(9)`.
fn in_bounds(square: (u8, u8)) -> bool {
    square.0 < BOARD_RANKS && square.1 < BOARD_FILES
}

/// Live match table plus the per-user "which match am I in" index.
pub struct MatchManager {
    config: MatchManagerConfig,
    matches: RwLock<BTreeMap<MatchId, Match>>,
    active_by_user: RwLock<BTreeMap<UserId, MatchId>>,
}

impl MatchManager {
    /// Build an empty match manager.
    pub fn new(config: MatchManagerConfig) -> Self {
        Self {
            config,
            matches: RwLock::new(BTreeMap::new()),
            active_by_user: RwLock::new(BTreeMap::new()),
        }
    }

    /// Whether `user_id` is currently a participant in an active match.
    pub async fn active_match_of(&self, user_id: UserId) -> Option<MatchId> {
        self.active_by_user.read().await.get(&user_id).copied()
    }

    /// Create a new match between `red` and `black`.
    pub async fn create_match(
        &self,
        red: UserId,
        red_username: String,
        black: UserId,
        black_username: String,
        rated: bool,
        initial_clock_ms: u64,
    ) -> Result<Match, CoreError> {
        let mut matches = self.matches.write().await;
        if matches.len() >= self.config.max_matches {
            return Err(CoreError::CapacityExceeded);
        }

        let id = MatchId::new_v4();
        let new_match = Match {
            id,
            red,
            red_username,
            black,
            black_username,
            rated,
            current_turn: Color::Red,
            moves: Vec::new(),
            red_clock_ms: initial_clock_ms,
            black_clock_ms: initial_clock_ms,
            last_move_at: Instant::now(),
            active: true,
            result: None,
            end_reason: None,
            draw_offered_by: None,
            rematch_requested_by: None,
            spectators: Vec::new(),
        };
        matches.insert(id, new_match.clone());
        drop(matches);

        let mut by_user = self.active_by_user.write().await;
        by_user.insert(red, id);
        by_user.insert(black, id);
        Ok(new_match)
    }

    /// Fetch a copy of a match's current state.
    pub async fn get(&self, match_id: MatchId) -> Result<Match, CoreError> {
        self.matches
            .read()
            .await
            .get(&match_id)
            .cloned()
            .ok_or(CoreError::NoSuchMatch)
    }

    /// Apply a move on behalf of `mover`. Enforces turn ownership and
    /// board bounds only; does not validate piece legality.
    pub async fn apply_move(
        &self,
        match_id: MatchId,
        mover: UserId,
        from: (u8, u8),
        to: (u8, u8),
    ) -> Result<MoveOutcome, CoreError> {
        if !in_bounds(from) || !in_bounds(to) || from == to {
            return Err(CoreError::InvalidMove);
        }

        let mut matches = self.matches.write().await;
        let m = matches.get_mut(&match_id).ok_or(CoreError::NoSuchMatch)?;

        if !m.active {
            return Err(CoreError::MatchEnded);
        }
        let color = m.color_of(mover).ok_or(CoreError::NotInMatch)?;
        if color != m.current_turn {
            return Err(CoreError::NotYourTurn);
        }

        let elapsed_ms = m.last_move_at.elapsed().as_millis() as u64;
        let remaining = m.clock_of(color).saturating_sub(elapsed_ms);
        m.set_clock(color, remaining);

        if remaining == 0 {
            let outcome = MatchEndOutcome {
                result: MatchResult::wins_for(color.opposite()),
                reason: EndReason::Timeout,
            };
            m.active = false;
            m.result = Some(outcome.result);
            m.end_reason = Some(outcome.reason);
            drop(matches);
            self.clear_active(match_id).await;
            return Ok(MoveOutcome {
                mover_color: color,
                clock_ms_after: 0,
                ended: Some(outcome),
            });
        }

        let index = m.moves.len() as u32;
        m.moves.push(Move {
            index,
            color,
            from,
            to,
            clock_ms_after: remaining,
        });
        m.draw_offered_by = None;
        m.current_turn = color.opposite();
        m.last_move_at = Instant::now();

        let mut ended = None;
        if m.moves.len() as u32 >= self.config.max_moves {
            let outcome = MatchEndOutcome {
                result: MatchResult::Draw,
                reason: EndReason::MoveLimit,
            };
            m.active = false;
            m.result = Some(outcome.result);
            m.end_reason = Some(outcome.reason);
            ended = Some(outcome);
        }
        drop(matches);

        if ended.is_some() {
            self.clear_active(match_id).await;
        }

        Ok(MoveOutcome {
            mover_color: color,
            clock_ms_after: remaining,
            ended,
        })
    }

    /// Resign a match on behalf of `user_id`. The opponent wins.
    pub async fn resign(&self, match_id: MatchId, user_id: UserId) -> Result<MatchEndOutcome, CoreError> {
        let mut matches = self.matches.write().await;
        let m = matches.get_mut(&match_id).ok_or(CoreError::NoSuchMatch)?;
        if !m.active {
            return Err(CoreError::MatchEnded);
        }
        let color = m.color_of(user_id).ok_or(CoreError::NotInMatch)?;
        let outcome = MatchEndOutcome {
            result: MatchResult::wins_for(color.opposite()),
            reason: EndReason::Resignation,
        };
        m.active = false;
        m.result = Some(outcome.result);
        m.end_reason = Some(outcome.reason);
        drop(matches);
        self.clear_active(match_id).await;
        Ok(outcome)
    }

    /// Record a draw offer from `user_id`.
    pub async fn offer_draw(&self, match_id: MatchId, user_id: UserId) -> Result<Color, CoreError> {
        let mut matches = self.matches.write().await;
        let m = matches.get_mut(&match_id).ok_or(CoreError::NoSuchMatch)?;
        if !m.active {
            return Err(CoreError::MatchEnded);
        }
        let color = m.color_of(user_id).ok_or(CoreError::NotInMatch)?;
        m.draw_offered_by = Some(color);
        Ok(color)
    }

    /// Respond to the outstanding draw offer. `None` is returned on
    /// decline (the offer is cleared but the match continues); `Some`
    /// is returned on acceptance, with the resulting draw outcome.
    pub async fn respond_draw(
        &self,
        match_id: MatchId,
        user_id: UserId,
        accept: bool,
    ) -> Result<Option<MatchEndOutcome>, CoreError> {
        let mut matches = self.matches.write().await;
        let m = matches.get_mut(&match_id).ok_or(CoreError::NoSuchMatch)?;
        if !m.active {
            return Err(CoreError::MatchEnded);
        }
        let color = m.color_of(user_id).ok_or(CoreError::NotInMatch)?;
        let offerer = m.draw_offered_by.ok_or(CoreError::NoSuchChallenge)?;
        if offerer == color {
            return Err(CoreError::NoSuchChallenge);
        }

        if !accept {
            m.draw_offered_by = None;
            return Ok(None);
        }

        let outcome = MatchEndOutcome {
            result: MatchResult::Draw,
            reason: EndReason::DrawAgreed,
        };
        m.active = false;
        m.result = Some(outcome.result);
        m.end_reason = Some(outcome.reason);
        drop(matches);
        self.clear_active(match_id).await;
        Ok(Some(outcome))
    }

    /// Record a rematch request against a finished match.
    pub async fn request_rematch(&self, match_id: MatchId, user_id: UserId) -> Result<Color, CoreError> {
        let mut matches = self.matches.write().await;
        let m = matches.get_mut(&match_id).ok_or(CoreError::NoSuchMatch)?;
        if m.active {
            return Err(CoreError::MatchEnded);
        }
        let color = m.color_of(user_id).ok_or(CoreError::NotInMatch)?;
        m.rematch_requested_by = Some(color);
        Ok(color)
    }

    /// Respond to an outstanding rematch request. Returns the two
    /// participants with colors swapped if accepted, for the caller to
    /// feed into `create_match`.
    pub async fn respond_rematch(
        &self,
        match_id: MatchId,
        user_id: UserId,
        accept: bool,
    ) -> Result<Option<(UserId, String, UserId, String, bool)>, CoreError> {
        let mut matches = self.matches.write().await;
        let m = matches.get_mut(&match_id).ok_or(CoreError::NoSuchMatch)?;
        let color = m.color_of(user_id).ok_or(CoreError::NotInMatch)?;
        let requester = m.rematch_requested_by.ok_or(CoreError::NoSuchChallenge)?;
        if requester == color {
            return Err(CoreError::NoSuchChallenge);
        }

        if !accept {
            m.rematch_requested_by = None;
            return Ok(None);
        }

        // Swap colors relative to the finished match.
        let new_red = m.black;
        let new_red_username = m.black_username.clone();
        let new_black = m.red;
        let new_black_username = m.red_username.clone();
        let rated = m.rated;
        m.rematch_requested_by = None;
        Ok(Some((new_red, new_red_username, new_black, new_black_username, rated)))
    }

    /// Add `user_id` as a spectator of `match_id`.
    pub async fn join_spectate(&self, match_id: MatchId, user_id: UserId) -> Result<(), CoreError> {
        let mut matches = self.matches.write().await;
        let m = matches.get_mut(&match_id).ok_or(CoreError::NoSuchMatch)?;
        if m.spectators.contains(&user_id) {
            return Ok(());
        }
        if m.spectators.len() >= self.config.max_spectators {
            return Err(CoreError::SpectatorsFull);
        }
        m.spectators.push(user_id);
        Ok(())
    }

    /// Remove `user_id` from `match_id`'s spectator set.
    pub async fn leave_spectate(&self, match_id: MatchId, user_id: UserId) -> Result<(), CoreError> {
        let mut matches = self.matches.write().await;
        let m = matches.get_mut(&match_id).ok_or(CoreError::NoSuchMatch)?;
        m.spectators.retain(|&id| id != user_id);
        Ok(())
    }

    /// Identifiers of every currently active match.
    pub async fn live_match_ids(&self) -> Vec<MatchId> {
        self.matches
            .read()
            .await
            .values()
            .filter(|m| m.active)
            .map(|m| m.id)
            .collect()
    }

    /// Sweep every active match for a clock that has reached zero since
    /// the last check, ending each such match as a timeout.
    pub async fn sweep_timeouts(&self) -> Vec<(MatchId, MatchEndOutcome)> {
        let mut timed_out = Vec::new();
        let mut matches = self.matches.write().await;
        for m in matches.values_mut() {
            if !m.active {
                continue;
            }
            let elapsed_ms = m.last_move_at.elapsed().as_millis() as u64;
            let remaining = m.clock_of(m.current_turn).saturating_sub(elapsed_ms);
            if remaining == 0 {
                let outcome = MatchEndOutcome {
                    result: MatchResult::wins_for(m.current_turn.opposite()),
                    reason: EndReason::Timeout,
                };
                m.set_clock(m.current_turn, 0);
                m.active = false;
                m.result = Some(outcome.result);
                m.end_reason = Some(outcome.reason);
                timed_out.push((m.id, outcome));
            }
        }
        drop(matches);

        if !timed_out.is_empty() {
            let mut by_user = self.active_by_user.write().await;
            for (match_id, _) in &timed_out {
                by_user.retain(|_, v| v != match_id);
            }
        }
        timed_out
    }

    async fn clear_active(&self, match_id: MatchId) {
        self.active_by_user.write().await.retain(|_, v| *v != match_id);
    }

    /// Roll back a match that was allocated but never successfully
    /// announced to both sides: mark it aborted and free both
    /// participants' active-match slot.
    pub async fn abort_match(&self, match_id: MatchId) -> Result<(), CoreError> {
        let mut matches = self.matches.write().await;
        let m = matches.get_mut(&match_id).ok_or(CoreError::NoSuchMatch)?;
        m.active = false;
        m.result = Some(MatchResult::Aborted);
        m.end_reason = Some(EndReason::NotifyFailed);
        drop(matches);
        self.clear_active(match_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MatchManagerConfig {
        MatchManagerConfig {
            max_matches: 10,
            max_spectators: 2,
            max_moves: 4,
            clock_sweep_interval: std::time::Duration::from_secs(5),
        }
    }

    async fn new_match(mgr: &MatchManager) -> (Match, UserId, UserId) {
        let red = UserId::new_v4();
        let black = UserId::new_v4();
        let m = mgr
            .create_match(red, "red".into(), black, "black".into(), true, 60_000)
            .await
            .unwrap();
        (m, red, black)
    }

    #[tokio::test]
    async fn turn_enforcement_rejects_out_of_turn_move() {
        let mgr = MatchManager::new(config());
        let (m, _red, black) = new_match(&mgr).await;
        let err = mgr.apply_move(m.id, black, (0, 0), (0, 1)).await;
        assert!(matches!(err, Err(CoreError::NotYourTurn)));
    }

    #[tokio::test]
    async fn valid_move_flips_turn_and_records_history() {
        let mgr = MatchManager::new(config());
        let (m, red, _black) = new_match(&mgr).await;
        let outcome = mgr.apply_move(m.id, red, (0, 0), (0, 1)).await.unwrap();
        assert_eq!(outcome.mover_color, Color::Red);
        assert!(outcome.ended.is_none());
        let state = mgr.get(m.id).await.unwrap();
        assert_eq!(state.current_turn, Color::Black);
        assert_eq!(state.moves.len(), 1);
    }

    #[tokio::test]
    async fn degenerate_move_is_rejected() {
        let mgr = MatchManager::new(config());
        let (m, red, _black) = new_match(&mgr).await;
        let err = mgr.apply_move(m.id, red, (3, 3), (3, 3)).await;
        assert!(matches!(err, Err(CoreError::InvalidMove)));
    }

    #[tokio::test]
    async fn out_of_bounds_move_is_rejected() {
        let mgr = MatchManager::new(config());
        let (m, red, _black) = new_match(&mgr).await;
        let err = mgr.apply_move(m.id, red, (0, 0), (20, 0)).await;
        assert!(matches!(err, Err(CoreError::InvalidMove)));
    }

    #[tokio::test]
    async fn move_cap_ends_match_in_draw() {
        let mgr = MatchManager::new(config());
        let (m, red, black) = new_match(&mgr).await;
        mgr.apply_move(m.id, red, (0, 0), (0, 1)).await.unwrap();
        mgr.apply_move(m.id, black, (9, 8), (9, 7)).await.unwrap();
        mgr.apply_move(m.id, red, (0, 1), (0, 2)).await.unwrap();
        let outcome = mgr.apply_move(m.id, black, (9, 7), (9, 6)).await.unwrap();
        let ended = outcome.ended.expect("move cap should end the match");
        assert_eq!(ended.result, MatchResult::Draw);
        assert_eq!(ended.reason, EndReason::MoveLimit);
    }

    #[tokio::test]
    async fn resign_gives_win_to_opponent() {
        let mgr = MatchManager::new(config());
        let (m, red, _black) = new_match(&mgr).await;
        let outcome = mgr.resign(m.id, red).await.unwrap();
        assert_eq!(outcome.result, MatchResult::BlackWins);
        assert_eq!(outcome.reason, EndReason::Resignation);
        assert!(mgr.active_match_of(red).await.is_none());
    }

    #[tokio::test]
    async fn draw_decline_does_not_end_match() {
        let mgr = MatchManager::new(config());
        let (m, red, black) = new_match(&mgr).await;
        mgr.offer_draw(m.id, red).await.unwrap();
        let result = mgr.respond_draw(m.id, black, false).await.unwrap();
        assert!(result.is_none());
        let state = mgr.get(m.id).await.unwrap();
        assert!(state.active);
        assert!(state.draw_offered_by.is_none());
    }

    #[tokio::test]
    async fn draw_accept_ends_match() {
        let mgr = MatchManager::new(config());
        let (m, red, black) = new_match(&mgr).await;
        mgr.offer_draw(m.id, red).await.unwrap();
        let result = mgr.respond_draw(m.id, black, true).await.unwrap();
        assert_eq!(result.unwrap().result, MatchResult::Draw);
    }

    #[tokio::test]
    async fn spectator_set_is_bounded() {
        let mgr = MatchManager::new(config());
        let (m, _red, _black) = new_match(&mgr).await;
        mgr.join_spectate(m.id, UserId::new_v4()).await.unwrap();
        mgr.join_spectate(m.id, UserId::new_v4()).await.unwrap();
        let err = mgr.join_spectate(m.id, UserId::new_v4()).await;
        assert!(matches!(err, Err(CoreError::SpectatorsFull)));
    }

    #[tokio::test]
    async fn sweep_timeouts_ends_matches_past_their_clock() {
        let mut cfg = config();
        cfg.max_matches = 10;
        let mgr = MatchManager::new(cfg);
        let red = UserId::new_v4();
        let black = UserId::new_v4();
        mgr.create_match(red, "red".into(), black, "black".into(), true, 1)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let timed_out = mgr.sweep_timeouts().await;
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].1.reason, EndReason::Timeout);
    }
}
