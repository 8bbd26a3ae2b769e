//! `Core`: the single owned struct holding every shared table. Built
//! once in `main` and shared via `Arc` across every connection task.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::CoreError;
use crate::lobby::{Challenge, Lobby, ReadyEntry, Room};
use crate::match_manager::{Match, MatchEndOutcome, MatchManager, MoveOutcome};
use crate::presence::PresenceRegistry;
use crate::protocol::Notification;
use crate::rating;
use crate::repo::{Outcome, Repository};
use crate::session::SessionStore;
use crate::types::{Color, MatchId, MatchResult, UserId, UserProfile};

/// All server-wide shared state.
pub struct Core {
    /// Static configuration.
    pub config: ServerConfig,
    /// Session Store.
    pub sessions: SessionStore,
    /// Presence Registry.
    pub presence: PresenceRegistry,
    /// Lobby (ready list, rooms, challenges).
    pub lobby: Lobby,
    /// Match Manager.
    pub matches: MatchManager,
    /// Account and match persistence.
    pub repo: Arc<dyn Repository>,
}

impl Core {
    /// Build a new `Core` from configuration and a repository.
    pub fn new(config: ServerConfig, repo: Arc<dyn Repository>) -> Self {
        let sessions = SessionStore::new(config.session.clone());
        let lobby = Lobby::new(config.lobby.clone());
        let matches = MatchManager::new(config.match_manager.clone());
        Self {
            config,
            sessions,
            presence: PresenceRegistry::new(),
            lobby,
            matches,
            repo,
        }
    }

    fn now_unix_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    // -----------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------

    /// Register a new account and log it in immediately.
    pub async fn register(&self, username: &str, password_hash: &str) -> Result<(UserId, String), CoreError> {
        let user = self.repo.create_user(username, password_hash).await?;
        let token = self.sessions.create(user.id).await?;
        Ok((user.id, token))
    }

    /// Log into an existing account.
    pub async fn login(&self, username: &str, password_hash: &str) -> Result<(UserId, String), CoreError> {
        let user = self
            .repo
            .get_user_by_username(username)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;
        if !constant_time_eq(user.password_hash.as_bytes(), password_hash.as_bytes()) {
            return Err(CoreError::InvalidCredentials);
        }
        let token = self.sessions.create(user.id).await?;
        Ok((user.id, token))
    }

    /// Log out, invalidating the session token.
    pub async fn logout(&self, token: &str) -> Result<(), CoreError> {
        self.sessions.destroy(token).await;
        Ok(())
    }

    /// Resolve a bearer token to a user id without touching activity.
    pub async fn authenticate(&self, token: &str) -> Result<UserId, CoreError> {
        self.sessions.validate(token).await
    }

    /// Refresh a session's last-activity time, keeping it alive past its TTL.
    pub async fn touch_session(&self, token: &str) -> Result<(), CoreError> {
        self.sessions.touch(token).await
    }

    /// Public profile for `user_id`, or the caller's own if `user_id` is `None`.
    pub async fn get_profile(&self, caller: UserId, user_id: Option<UserId>) -> Result<UserProfile, CoreError> {
        let target = user_id.unwrap_or(caller);
        let user = self
            .repo
            .get_user(target)
            .await?
            .ok_or_else(|| CoreError::Repository("unknown user".into()))?;
        Ok(UserProfile::from(&user))
    }

    /// Top-rated accounts.
    pub async fn leaderboard(&self, limit: u32) -> Result<Vec<crate::protocol::LeaderboardEntry>, CoreError> {
        let users = self.repo.top_ratings(limit).await?;
        Ok(users
            .into_iter()
            .map(|u| crate::protocol::LeaderboardEntry {
                username: u.username,
                rating: u.rating,
            })
            .collect())
    }

    // -----------------------------------------------------------------
    // Ready list / matchmaking
    // -----------------------------------------------------------------

    /// Join or leave the ready list.
    pub async fn set_ready(&self, user_id: UserId, username: String, rating: i32, ready: bool) -> Result<(), CoreError> {
        if ready {
            if self.matches.active_match_of(user_id).await.is_some() {
                return Err(CoreError::AlreadyInMatch);
            }
            self.lobby
                .set_ready(ReadyEntry {
                    user_id,
                    username,
                    rating,
                    ready_since: std::time::Instant::now(),
                    rated: false,
                })
                .await?;
        } else {
            self.lobby.clear_ready(user_id).await;
        }
        self.broadcast_ready_list().await;
        Ok(())
    }

    /// Join the matchmaking pool expressing a rated/unrated preference,
    /// then attempt one immediate pairing pass.
    ///
    /// Returns `true` if this call paired the caller into a match, `false`
    /// if it was only queued (the caller should report `{status:
    /// "queued"}` in that case).
    pub async fn find_match(
        &self,
        user_id: UserId,
        username: String,
        rating: i32,
        rated: bool,
    ) -> Result<bool, CoreError> {
        if self.matches.active_match_of(user_id).await.is_some() {
            return Err(CoreError::AlreadyInMatch);
        }
        self.lobby
            .set_ready(ReadyEntry {
                user_id,
                username,
                rating,
                ready_since: std::time::Instant::now(),
                rated,
            })
            .await?;
        self.broadcast_ready_list().await;
        self.run_matchmaking_pass(rated).await;
        Ok(self.matches.active_match_of(user_id).await.is_some())
    }

    /// One pass of matchmaking: `rated` selects which algorithm runs.
    /// Pairs found are created as matches and both sides are notified.
    ///
    /// The match is allocated optimistically, before either side is
    /// known to still be reachable; if delivering `match_found` fails
    /// for one side (its connection vanished between the queue scan and
    /// this point), the match is rolled back to `aborted`/`notify_failed`
    /// and the still-connected side is returned to the ready list,
    /// since the unreachable side already has no way to learn anything
    /// happened.
    pub async fn run_matchmaking_pass(&self, rated: bool) {
        let pair = if rated {
            self.lobby.find_rated_match().await
        } else {
            self.lobby.find_random_match().await
        };
        let Some((a, b)) = pair else { return };

        let m = match self
            .matches
            .create_match(
                a.user_id,
                a.username.clone(),
                b.user_id,
                b.username.clone(),
                rated,
                self.config.initial_clock_ms,
            )
            .await
        {
            Ok(m) => m,
            Err(err) => {
                warn!(error = %err, "failed to create match after pairing");
                self.requeue_if_connected(a).await;
                self.requeue_if_connected(b).await;
                return;
            }
        };

        let sent_a = self
            .presence
            .send_to_user(
                a.user_id,
                Notification::MatchFound {
                    match_id: m.id,
                    opponent: b.username.clone(),
                    color: Color::Red,
                    rated,
                },
            )
            .await;
        let sent_b = self
            .presence
            .send_to_user(
                b.user_id,
                Notification::MatchFound {
                    match_id: m.id,
                    opponent: a.username.clone(),
                    color: Color::Black,
                    rated,
                },
            )
            .await;

        if sent_a && sent_b {
            let start = Notification::MatchStart {
                match_id: m.id,
                red: m.red_username.clone(),
                black: m.black_username.clone(),
                initial_clock_ms: self.config.initial_clock_ms,
            };
            self.presence.send_to_user(m.red, start.clone()).await;
            self.presence.send_to_user(m.black, start).await;
            info!(match_id = %m.id, rated = m.rated, "match started");
            return;
        }

        warn!(match_id = %m.id, "rolling back pairing, one side was unreachable");
        if let Err(err) = self.matches.abort_match(m.id).await {
            warn!(error = %err, "failed to roll back aborted match");
        }
        if sent_a && !sent_b {
            self.requeue_if_connected(a).await;
        } else if sent_b && !sent_a {
            self.requeue_if_connected(b).await;
        }
    }

    /// Roll a still-connected, unmatched entry back onto the ready list
    /// after its would-be opponent turned out to be a ghost.
    async fn requeue_if_connected(&self, entry: ReadyEntry) {
        if self.presence.is_connected(entry.user_id).await {
            let _ = self.lobby.set_ready(entry).await;
        }
    }

    async fn broadcast_ready_list(&self) {
        let user_ids = self.lobby.ready_user_ids().await;
        let usernames = self.lobby.ready_usernames().await;
        self.presence
            .broadcast_to_ready(&user_ids, Notification::ReadyListUpdate { usernames })
            .await;
    }

    async fn announce_match_start(&self, m: &Match) {
        self.presence
            .send_to_user(
                m.red,
                Notification::MatchFound {
                    match_id: m.id,
                    opponent: m.black_username.clone(),
                    color: Color::Red,
                    rated: m.rated,
                },
            )
            .await;
        self.presence
            .send_to_user(
                m.black,
                Notification::MatchFound {
                    match_id: m.id,
                    opponent: m.red_username.clone(),
                    color: Color::Black,
                    rated: m.rated,
                },
            )
            .await;
        let start = Notification::MatchStart {
            match_id: m.id,
            red: m.red_username.clone(),
            black: m.black_username.clone(),
            initial_clock_ms: self.config.initial_clock_ms,
        };
        self.presence.send_to_user(m.red, start.clone()).await;
        self.presence.send_to_user(m.black, start).await;
        info!(match_id = %m.id, rated = m.rated, "match started");
    }

    // -----------------------------------------------------------------
    // Match play
    // -----------------------------------------------------------------

    /// Apply a move and notify the opponent / finalize on match end.
    pub async fn make_move(
        &self,
        match_id: MatchId,
        user_id: UserId,
        from: (u8, u8),
        to: (u8, u8),
    ) -> Result<MoveOutcome, CoreError> {
        let outcome = self.matches.apply_move(match_id, user_id, from, to).await?;
        let m = self.matches.get(match_id).await?;
        let opponent = if m.red == user_id { m.black } else { m.red };
        self.presence
            .send_to_user(
                opponent,
                Notification::OpponentMove {
                    match_id,
                    from,
                    to,
                    clock_ms_after: outcome.clock_ms_after,
                },
            )
            .await;
        self.broadcast_to_spectators(&m, Notification::OpponentMove {
            match_id,
            from,
            to,
            clock_ms_after: outcome.clock_ms_after,
        })
        .await;

        if let Some(ended) = outcome.ended {
            self.finalize_match(&m, ended).await;
        }
        Ok(outcome)
    }

    /// Resign from a match.
    pub async fn resign(&self, match_id: MatchId, user_id: UserId) -> Result<(), CoreError> {
        let outcome = self.matches.resign(match_id, user_id).await?;
        let m = self.matches.get(match_id).await?;
        self.finalize_match(&m, outcome).await;
        Ok(())
    }

    /// Offer a draw to the opponent.
    pub async fn offer_draw(&self, match_id: MatchId, user_id: UserId) -> Result<(), CoreError> {
        let color = self.matches.offer_draw(match_id, user_id).await?;
        let m = self.matches.get(match_id).await?;
        let opponent = if color == Color::Red { m.black } else { m.red };
        self.presence
            .send_to_user(
                opponent,
                Notification::DrawOffer {
                    match_id,
                    from: m.username_of(color).to_string(),
                    offered: true,
                },
            )
            .await;
        Ok(())
    }

    /// Respond to an outstanding draw offer.
    pub async fn respond_draw(&self, match_id: MatchId, user_id: UserId, accept: bool) -> Result<(), CoreError> {
        let outcome = self.matches.respond_draw(match_id, user_id, accept).await?;
        let m = self.matches.get(match_id).await?;
        match outcome {
            Some(ended) => self.finalize_match(&m, ended).await,
            None => {
                let responder_color = m.color_of(user_id).unwrap();
                let offerer = responder_color.opposite();
                let offerer_id = if offerer == Color::Red { m.red } else { m.black };
                self.presence
                    .send_to_user(
                        offerer_id,
                        Notification::DrawOffer {
                            match_id,
                            from: m.username_of(responder_color).to_string(),
                            offered: false,
                        },
                    )
                    .await;
            }
        }
        Ok(())
    }

    /// Request a rematch of a finished match.
    pub async fn request_rematch(&self, match_id: MatchId, user_id: UserId) -> Result<(), CoreError> {
        let color = self.matches.request_rematch(match_id, user_id).await?;
        let m = self.matches.get(match_id).await?;
        let opponent = if color == Color::Red { m.black } else { m.red };
        self.presence
            .send_to_user(
                opponent,
                Notification::RematchRequest {
                    match_id,
                    from: m.username_of(color).to_string(),
                },
            )
            .await;
        Ok(())
    }

    /// Respond to an outstanding rematch request, creating a new match
    /// with colors swapped if accepted.
    pub async fn respond_rematch(&self, match_id: MatchId, user_id: UserId, accept: bool) -> Result<(), CoreError> {
        let swapped = self.matches.respond_rematch(match_id, user_id, accept).await?;
        match swapped {
            Some((red, red_username, black, black_username, rated)) => {
                let new_match = self
                    .matches
                    .create_match(red, red_username, black, black_username, rated, self.config.initial_clock_ms)
                    .await?;
                self.announce_match_start(&new_match).await;
            }
            None => {
                let m = self.matches.get(match_id).await?;
                self.presence
                    .send_to_user(m.red, Notification::RematchDeclined { match_id })
                    .await;
                self.presence
                    .send_to_user(m.black, Notification::RematchDeclined { match_id })
                    .await;
            }
        }
        Ok(())
    }

    /// Add a spectator to a match.
    pub async fn join_spectate(&self, match_id: MatchId, user_id: UserId) -> Result<(), CoreError> {
        self.matches.join_spectate(match_id, user_id).await
    }

    /// Remove a spectator from a match.
    pub async fn leave_spectate(&self, match_id: MatchId, user_id: UserId) -> Result<(), CoreError> {
        self.matches.leave_spectate(match_id, user_id).await
    }

    /// Describe a match's current state.
    pub async fn get_match(&self, match_id: MatchId) -> Result<Match, CoreError> {
        self.matches.get(match_id).await
    }

    /// Snapshot both clocks for a live match.
    pub async fn get_timer(&self, match_id: MatchId) -> Result<crate::types::TimerSnapshot, CoreError> {
        let m = self.matches.get(match_id).await?;
        Ok(crate::types::TimerSnapshot {
            match_id,
            red_clock_ms: m.red_clock_ms,
            black_clock_ms: m.black_clock_ms,
            current_turn: m.current_turn,
            active: m.active,
        })
    }

    /// Identifiers of every currently live match.
    pub async fn get_live_matches(&self) -> Vec<MatchId> {
        self.matches.live_match_ids().await
    }

    /// Match history for a user.
    pub async fn match_history(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<crate::types::MatchSummary>, CoreError> {
        self.repo.match_history(user_id, limit, offset).await
    }

    /// Periodic clock sweep: end any match whose active side's clock has
    /// run out since the last check, updating ratings/stats and
    /// notifying both sides.
    pub async fn sweep_match_clocks(&self) {
        let timed_out = self.matches.sweep_timeouts().await;
        for (match_id, outcome) in timed_out {
            if let Ok(m) = self.matches.get(match_id).await {
                self.finalize_match(&m, outcome).await;
            }
        }
    }

    /// Periodic challenge sweep: drop and notify on any expired challenge.
    pub async fn sweep_challenges(&self) {
        for challenge in self.lobby.sweep_expired_challenges().await {
            info!(challenge_id = %challenge.id, "challenge expired");
        }
    }

    async fn finalize_match(&self, m: &Match, outcome: MatchEndOutcome) {
        // Ratings are computed and persisted before the `game_end`
        // broadcast, since rated endings carry the final ratings in
        // that same notification.
        let mut red_rating = None;
        let mut black_rating = None;

        if m.rated {
            if let (Ok(Some(red_user)), Ok(Some(black_user))) =
                (self.repo.get_user(m.red).await, self.repo.get_user(m.black).await)
            {
                let red_score = match outcome.result {
                    MatchResult::RedWins => Some(1.0),
                    MatchResult::BlackWins => Some(0.0),
                    MatchResult::Draw => Some(0.5),
                    MatchResult::Aborted => None,
                };
                if let Some(red_score) = red_score {
                    let (new_red, new_black) =
                        rating::apply_result(red_user.rating, black_user.rating, red_score, self.config.k_factor);

                    if let Err(err) = self.repo.update_rating(m.red, new_red).await {
                        warn!(error = %err, "failed to persist updated rating");
                    }
                    if let Err(err) = self.repo.update_rating(m.black, new_black).await {
                        warn!(error = %err, "failed to persist updated rating");
                    }
                    red_rating = Some(new_red);
                    black_rating = Some(new_black);

                    let (red_outcome, black_outcome) = match outcome.result {
                        MatchResult::RedWins => (Outcome::Win, Outcome::Loss),
                        MatchResult::BlackWins => (Outcome::Loss, Outcome::Win),
                        MatchResult::Draw => (Outcome::Draw, Outcome::Draw),
                        MatchResult::Aborted => unreachable!("guarded by red_score above"),
                    };
                    let _ = self.repo.record_outcome(m.red, red_outcome).await;
                    let _ = self.repo.record_outcome(m.black, black_outcome).await;
                }
            }
        }

        let game_end = Notification::GameEnd {
            match_id: m.id,
            result: outcome.result,
            reason: outcome.reason,
            red_rating,
            black_rating,
        };
        self.presence.send_to_user(m.red, game_end.clone()).await;
        self.presence.send_to_user(m.black, game_end.clone()).await;
        self.broadcast_to_spectators(m, game_end).await;

        if let Err(err) = self
            .repo
            .persist_match(m.id, m.red, m.black, outcome.result, m.rated, Self::now_unix_ms())
            .await
        {
            warn!(match_id = %m.id, error = %err, "failed to persist finished match");
        }
    }

    async fn broadcast_to_spectators(&self, m: &Match, notification: Notification) {
        self.presence.broadcast_to_match(&m.spectators, notification).await;
    }

    // -----------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------

    /// Create a room.
    pub async fn create_room(
        &self,
        host: UserId,
        host_username: String,
        name: String,
        password: Option<String>,
        rated: bool,
    ) -> Result<Room, CoreError> {
        let room = self.lobby.create_room(host, host_username, name, password, rated).await?;
        self.broadcast_rooms_update().await;
        Ok(room)
    }

    /// Join an open room.
    pub async fn join_room(
        &self,
        code: &str,
        guest: UserId,
        guest_username: String,
        password: Option<&str>,
    ) -> Result<Room, CoreError> {
        let room = self.lobby.join_room(code, guest, guest_username.clone(), password).await?;
        self.presence
            .send_to_user(
                room.host,
                Notification::RoomGuestJoined {
                    room_code: room.code.clone(),
                    guest: guest_username,
                },
            )
            .await;
        self.broadcast_rooms_update().await;
        Ok(room)
    }

    /// Leave a room as its guest.
    pub async fn leave_room(&self, code: &str, guest: UserId) -> Result<Room, CoreError> {
        let room = self.lobby.leave_room(code, guest).await?;
        self.presence
            .send_to_user(room.host, Notification::RoomGuestLeft { room_code: room.code.clone() })
            .await;
        self.broadcast_rooms_update().await;
        Ok(room)
    }

    /// Close a room (host only).
    pub async fn close_room(&self, code: &str, host: UserId) -> Result<Room, CoreError> {
        let room = self.lobby.close_room(code, host).await?;
        if let Some(guest) = room.guest {
            self.presence
                .send_to_user(guest, Notification::RoomClosed { room_code: room.code.clone() })
                .await;
        }
        self.broadcast_rooms_update().await;
        Ok(room)
    }

    /// Start the match for a paired room (host only).
    pub async fn start_room_game(&self, code: &str, host: UserId) -> Result<Match, CoreError> {
        let room = self.lobby.start_room_game(code, host).await?;
        let guest = room.guest.ok_or(CoreError::RoomNotOpen)?;
        let guest_username = room.guest_username.clone().unwrap_or_default();
        let m = self
            .matches
            .create_match(
                room.host,
                room.host_username.clone(),
                guest,
                guest_username,
                room.rated,
                self.config.initial_clock_ms,
            )
            .await?;
        self.announce_match_start(&m).await;
        Ok(m)
    }

    /// Open rooms, for `get_rooms`.
    pub async fn get_rooms(&self) -> Vec<Room> {
        self.lobby.open_rooms().await
    }

    async fn broadcast_rooms_update(&self) {
        let rooms = self.get_rooms().await;
        let summaries: Vec<crate::protocol::RoomSummary> = rooms
            .iter()
            .map(|r| crate::protocol::RoomSummary {
                room_code: r.code.clone(),
                name: r.name.clone(),
                host: r.host_username.clone(),
                has_password: r.password.is_some(),
            })
            .collect();
        self.presence
            .broadcast_to_ready(&self.lobby.ready_user_ids().await, Notification::RoomsUpdate { rooms: summaries })
            .await;
    }

    // -----------------------------------------------------------------
    // Challenges
    // -----------------------------------------------------------------

    /// Issue a challenge to another user by username.
    pub async fn challenge(
        &self,
        from: UserId,
        from_username: String,
        target_username: &str,
        rated: bool,
    ) -> Result<Challenge, CoreError> {
        let target = self
            .repo
            .get_user_by_username(target_username)
            .await?
            .ok_or(CoreError::Repository("no such user".into()))?;
        let challenge = self.lobby.create_challenge(from, from_username.clone(), target.id, rated).await?;
        self.presence
            .send_to_user(
                target.id,
                Notification::ChallengeReceived {
                    challenge_id: challenge.id,
                    from: from_username,
                    rated,
                },
            )
            .await;
        Ok(challenge)
    }

    /// Accept a challenge, creating a match with the challenger as red.
    /// Only the challenge's addressee may accept it.
    pub async fn accept_challenge(
        &self,
        challenge_id: crate::types::ChallengeId,
        user_id: UserId,
    ) -> Result<Match, CoreError> {
        let challenge = self.lobby.accept_challenge(challenge_id, user_id).await?;
        if self.matches.active_match_of(challenge.from).await.is_some()
            || self.matches.active_match_of(challenge.to).await.is_some()
        {
            return Err(CoreError::AlreadyInMatch);
        }
        let target = self
            .repo
            .get_user(challenge.to)
            .await?
            .ok_or_else(|| CoreError::Repository("unknown user".into()))?;
        let m = self
            .matches
            .create_match(
                challenge.from,
                challenge.from_username,
                challenge.to,
                target.username,
                challenge.rated,
                self.config.initial_clock_ms,
            )
            .await?;
        self.announce_match_start(&m).await;
        Ok(m)
    }

    /// Decline a challenge, notifying the challenger. Only the
    /// challenge's addressee may decline it.
    pub async fn decline_challenge(
        &self,
        challenge_id: crate::types::ChallengeId,
        user_id: UserId,
    ) -> Result<(), CoreError> {
        let challenge = self.lobby.decline_challenge(challenge_id, user_id).await?;
        let decliner_name = self
            .repo
            .get_user(user_id)
            .await?
            .map(|u| u.username)
            .unwrap_or_else(|| "unknown".to_string());
        self.presence
            .send_to_user(
                challenge.from,
                Notification::ChallengeDeclined {
                    challenge_id: challenge.id,
                    from: decliner_name,
                },
            )
            .await;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Chat
    // -----------------------------------------------------------------

    /// Send a chat message, scoped to a match or the lobby ready list.
    pub async fn chat_message(&self, from_username: String, match_id: Option<MatchId>, message: String) -> Result<(), CoreError> {
        let notification = Notification::ChatMessage {
            from: from_username,
            message,
        };
        match match_id {
            Some(match_id) => {
                let m = self.matches.get(match_id).await?;
                self.presence.send_to_user(m.red, notification.clone()).await;
                self.presence.send_to_user(m.black, notification.clone()).await;
                self.broadcast_to_spectators(&m, notification).await;
            }
            None => {
                self.presence
                    .broadcast_to_ready(&self.lobby.ready_user_ids().await, notification)
                    .await;
            }
        }
        Ok(())
    }
}

/// Constant-time byte comparison, used for credential comparison so
/// timing does not leak how many leading bytes matched.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::InMemoryRepository;

    fn core() -> Core {
        Core::new(ServerConfig::default(), Arc::new(InMemoryRepository::new()))
    }

    #[tokio::test]
    async fn register_then_login_round_trip() {
        let core = core();
        let (user_id, _token) = core.register("alice", "hashed").await.unwrap();
        let (login_id, token) = core.login("alice", "hashed").await.unwrap();
        assert_eq!(user_id, login_id);
        assert_eq!(core.authenticate(&token).await.unwrap(), user_id);
    }

    #[tokio::test]
    async fn login_rejects_wrong_password() {
        let core = core();
        core.register("bob", "hashed").await.unwrap();
        let err = core.login("bob", "wrong").await;
        assert!(matches!(err, Err(CoreError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn matchmaking_pairs_two_ready_players() {
        let core = core();
        let (a, _) = core.register("a", "h").await.unwrap();
        let (b, _) = core.register("b", "h").await.unwrap();

        let (_tx_a, mut rx_a) = tokio::sync::mpsc::channel(8);
        let (_tx_b, mut rx_b) = tokio::sync::mpsc::channel(8);
        core.presence.register_connection(1, _tx_a).await;
        core.presence.register_connection(2, _tx_b).await;
        core.presence.attach_user(1, a).await;
        core.presence.attach_user(2, b).await;

        core.find_match(a, "a".into(), 1200, false).await.unwrap();
        core.find_match(b, "b".into(), 1200, false).await.unwrap();

        let found_a = rx_a.recv().await.unwrap();
        assert!(matches!(found_a, Notification::MatchFound { .. }));
        let found_b = rx_b.recv().await.unwrap();
        assert!(matches!(found_b, Notification::MatchFound { .. }));

        assert!(core.matches.active_match_of(a).await.is_some());
        assert!(core.matches.active_match_of(b).await.is_some());
    }

    #[tokio::test]
    async fn ghost_opponent_rolls_back_pairing_and_requeues_survivor() {
        let core = core();
        let (a, _) = core.register("a", "h").await.unwrap();
        let (b, _) = core.register("b", "h").await.unwrap();

        let (_tx_a, mut rx_a) = tokio::sync::mpsc::channel(8);
        core.presence.register_connection(1, _tx_a).await;
        core.presence.attach_user(1, a).await;
        // b never gets a connection registered: it looks ready but is
        // unreachable by the time the pairing tries to notify it.

        core.find_match(a, "a".into(), 1200, false).await.unwrap();
        core.find_match(b, "b".into(), 1200, false).await.unwrap();

        assert!(rx_a.try_recv().is_err(), "a must not observe a match_found for a rolled-back pairing");
        assert!(core.matches.active_match_of(a).await.is_none());
        assert!(core.matches.active_match_of(b).await.is_none());
        assert_eq!(core.lobby.ready_user_ids().await, vec![a]);
    }

    #[tokio::test]
    async fn already_in_match_rejects_find_match() {
        let core = core();
        let (a, _) = core.register("a", "h").await.unwrap();
        let (b, _) = core.register("b", "h").await.unwrap();
        core.matches
            .create_match(a, "a".into(), b, "b".into(), false, 60_000)
            .await
            .unwrap();

        let err = core.find_match(a, "a".into(), 1200, false).await;
        assert!(matches!(err, Err(CoreError::AlreadyInMatch)));
    }
}
