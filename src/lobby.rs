//! Lobby: ready list, rooms, challenges, and matchmaking selection.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::RwLock;

use crate::config::LobbyConfig;
use crate::error::CoreError;
use crate::types::{ChallengeId, UserId};

/// One entry on the ready list.
#[derive(Debug, Clone)]
pub struct ReadyEntry {
    /// Account identifier.
    pub user_id: UserId,
    /// Display name, cached so matchmaking and notifications don't need
    /// a repository round trip.
    pub username: String,
    /// Current Elo rating, cached at the time of becoming ready.
    pub rating: i32,
    /// When this entry joined the ready list.
    pub ready_since: Instant,
    /// Whether this player wants rating-aware pairing.
    pub rated: bool,
}

/// State machine for a hosted room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Waiting for a guest.
    Open,
    /// A guest has joined; waiting for the host to start.
    Paired,
    /// The host started the match.
    Started,
    /// The room was closed by its host.
    Closed,
}

/// A hosted room.
#[derive(Debug, Clone)]
pub struct Room {
    /// 8 hex character room code.
    pub code: String,
    /// Host-chosen display name.
    pub name: String,
    /// Host account.
    pub host: UserId,
    /// Host's display name.
    pub host_username: String,
    /// Guest account, once paired.
    pub guest: Option<UserId>,
    /// Guest's display name, once paired.
    pub guest_username: Option<String>,
    /// Optional join password, compared in constant time.
    pub password: Option<String>,
    /// Whether the eventual match is rated.
    pub rated: bool,
    /// Current lifecycle state.
    pub state: RoomState,
}

/// A pending direct challenge. Accepting, declining, or expiring removes
/// the record entirely; there is no terminal state stored at rest.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Challenge identifier.
    pub id: ChallengeId,
    /// Challenger account.
    pub from: UserId,
    /// Challenger's display name.
    pub from_username: String,
    /// Challenged account.
    pub to: UserId,
    /// Whether the resulting match is rated.
    pub rated: bool,
    /// When the challenge was issued.
    pub created_at: Instant,
}

/// Ready list, room table, and challenge table, plus matchmaking selection.
pub struct Lobby {
    config: LobbyConfig,
    ready: RwLock<Vec<ReadyEntry>>,
    rooms: RwLock<BTreeMap<String, Room>>,
    challenges: RwLock<BTreeMap<ChallengeId, Challenge>>,
}

impl Lobby {
    /// Build an empty lobby.
    pub fn new(config: LobbyConfig) -> Self {
        Self {
            config,
            ready: RwLock::new(Vec::new()),
            rooms: RwLock::new(BTreeMap::new()),
            challenges: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add or update `entry` on the ready list, deduplicating by `user_id`.
    pub async fn set_ready(&self, entry: ReadyEntry) -> Result<(), CoreError> {
        let mut ready = self.ready.write().await;
        if let Some(existing) = ready.iter_mut().find(|e| e.user_id == entry.user_id) {
            *existing = entry;
            return Ok(());
        }
        if ready.len() >= self.config.max_ready {
            return Err(CoreError::CapacityExceeded);
        }
        ready.push(entry);
        Ok(())
    }

    /// Remove `user_id` from the ready list, if present.
    pub async fn clear_ready(&self, user_id: UserId) {
        self.ready.write().await.retain(|e| e.user_id != user_id);
    }

    /// Usernames currently on the ready list, for broadcast.
    pub async fn ready_usernames(&self) -> Vec<String> {
        self.ready.read().await.iter().map(|e| e.username.clone()).collect()
    }

    /// Account identifiers currently on the ready list, for broadcast
    /// targeting.
    pub async fn ready_user_ids(&self) -> Vec<UserId> {
        self.ready.read().await.iter().map(|e| e.user_id).collect()
    }

    /// Pop the two earliest-ready unrated entries, if at least two exist.
    pub async fn find_random_match(&self) -> Option<(ReadyEntry, ReadyEntry)> {
        let mut ready = self.ready.write().await;
        let candidates: Vec<usize> = ready
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.rated)
            .map(|(i, _)| i)
            .collect();
        if candidates.len() < 2 {
            return None;
        }
        let (i, j) = (candidates[0], candidates[1]);
        // Remove higher index first so the lower index stays valid.
        let second = ready.remove(j);
        let first = ready.remove(i);
        Some((first, second))
    }

    /// Find the pair of rated, ready entries with the smallest rating gap
    /// within tolerance, tie-broken by earliest `ready_since`.
    pub async fn find_rated_match(&self) -> Option<(ReadyEntry, ReadyEntry)> {
        let mut ready = self.ready.write().await;
        let candidates: Vec<usize> = ready
            .iter()
            .enumerate()
            .filter(|(_, e)| e.rated)
            .map(|(i, _)| i)
            .collect();

        let mut best: Option<(usize, usize, i32)> = None;
        for a in 0..candidates.len() {
            for b in (a + 1)..candidates.len() {
                let (ia, ib) = (candidates[a], candidates[b]);
                let diff = (ready[ia].rating - ready[ib].rating).abs();
                if diff > self.config.rating_tolerance {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((bi, bj, bdiff)) => {
                        diff < bdiff
                            || (diff == bdiff
                                && ready[ia].ready_since.min(ready[ib].ready_since)
                                    < ready[bi].ready_since.min(ready[bj].ready_since))
                    }
                };
                if better {
                    best = Some((ia, ib, diff));
                }
            }
        }

        let (i, j, _) = best?;
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        let second = ready.remove(hi);
        let first = ready.remove(lo);
        Some((first, second))
    }

    /// Create a new open room hosted by `host`, retrying room-code
    /// generation on collision.
    pub async fn create_room(
        &self,
        host: UserId,
        host_username: String,
        name: String,
        password: Option<String>,
        rated: bool,
    ) -> Result<Room, CoreError> {
        let mut rooms = self.rooms.write().await;
        if rooms.len() >= self.config.max_rooms {
            return Err(CoreError::CapacityExceeded);
        }

        let code = loop {
            let candidate = generate_room_code();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let room = Room {
            code: code.clone(),
            name,
            host,
            host_username,
            guest: None,
            guest_username: None,
            password,
            rated,
            state: RoomState::Open,
        };
        rooms.insert(code, room.clone());
        Ok(room)
    }

    /// Join an open room, checking the password in constant time.
    pub async fn join_room(
        &self,
        code: &str,
        guest: UserId,
        guest_username: String,
        password: Option<&str>,
    ) -> Result<Room, CoreError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code).ok_or(CoreError::NoSuchRoom)?;

        if room.state != RoomState::Open {
            return Err(CoreError::RoomNotOpen);
        }
        if let Some(expected) = &room.password {
            let supplied = password.unwrap_or("");
            if !constant_time_eq(expected.as_bytes(), supplied.as_bytes()) {
                return Err(CoreError::WrongPassword);
            }
        }

        room.guest = Some(guest);
        room.guest_username = Some(guest_username);
        room.state = RoomState::Paired;
        Ok(room.clone())
    }

    /// Leave a paired room as its guest, returning it to `Open`.
    pub async fn leave_room(&self, code: &str, guest: UserId) -> Result<Room, CoreError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code).ok_or(CoreError::NoSuchRoom)?;
        if room.guest != Some(guest) {
            return Err(CoreError::NoSuchRoom);
        }
        room.guest = None;
        room.guest_username = None;
        room.state = RoomState::Open;
        Ok(room.clone())
    }

    /// Close a room. Only the host may do this.
    pub async fn close_room(&self, code: &str, host: UserId) -> Result<Room, CoreError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get(code).ok_or(CoreError::NoSuchRoom)?;
        if room.host != host {
            return Err(CoreError::NotHost);
        }
        let mut room = rooms.remove(code).unwrap();
        room.state = RoomState::Closed;
        Ok(room)
    }

    /// Start the match for a paired room. Only the host may do this.
    pub async fn start_room_game(&self, code: &str, host: UserId) -> Result<Room, CoreError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(code).ok_or(CoreError::NoSuchRoom)?;
        if room.host != host {
            return Err(CoreError::NotHost);
        }
        if room.state != RoomState::Paired {
            return Err(CoreError::RoomNotOpen);
        }
        room.state = RoomState::Started;
        Ok(room.clone())
    }

    /// List of open rooms for `get_rooms`/`rooms_update`.
    pub async fn open_rooms(&self) -> Vec<Room> {
        self.rooms
            .read()
            .await
            .values()
            .filter(|r| r.state == RoomState::Open)
            .cloned()
            .collect()
    }

    /// Issue a new challenge from `from` to `to`.
    pub async fn create_challenge(
        &self,
        from: UserId,
        from_username: String,
        to: UserId,
        rated: bool,
    ) -> Result<Challenge, CoreError> {
        let mut challenges = self.challenges.write().await;
        let id = ChallengeId::new_v4();
        let challenge = Challenge {
            id,
            from,
            from_username,
            to,
            rated,
            created_at: Instant::now(),
        };
        challenges.insert(id, challenge.clone());
        Ok(challenge)
    }

    /// Accept a pending challenge addressed to `responder`, removing it
    /// from the table. Checked and removed under the same write lock so
    /// a caller who isn't the addressee can't consume someone else's
    /// challenge just by guessing its id.
    pub async fn accept_challenge(&self, id: ChallengeId, responder: UserId) -> Result<Challenge, CoreError> {
        let mut challenges = self.challenges.write().await;
        match challenges.get(&id) {
            Some(c) if c.to == responder => Ok(challenges.remove(&id).expect("just checked")),
            Some(_) => Err(CoreError::NotChallengeRecipient),
            None => Err(CoreError::NoSuchChallenge),
        }
    }

    /// Decline a pending challenge addressed to `responder`, removing it
    /// from the table.
    pub async fn decline_challenge(&self, id: ChallengeId, responder: UserId) -> Result<Challenge, CoreError> {
        let mut challenges = self.challenges.write().await;
        match challenges.get(&id) {
            Some(c) if c.to == responder => Ok(challenges.remove(&id).expect("just checked")),
            Some(_) => Err(CoreError::NotChallengeRecipient),
            None => Err(CoreError::NoSuchChallenge),
        }
    }

    /// Remove and return any challenges past their TTL.
    pub async fn sweep_expired_challenges(&self) -> Vec<Challenge> {
        let ttl = self.config.challenge_ttl;
        let mut challenges = self.challenges.write().await;
        let expired: Vec<ChallengeId> = challenges
            .iter()
            .filter(|(_, c)| c.created_at.elapsed() >= ttl)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| challenges.remove(&id))
            .collect()
    }
}

fn generate_room_code() -> String {
    let mut rng = rand::thread_rng();
    format!("{:04X}{:04X}", rng.gen::<u16>(), rng.gen::<u16>())
}

/// Constant-time byte comparison, used for room passwords so timing does
/// not leak how many leading bytes matched.
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

    fn lobby() -> Lobby {
        Lobby::new(LobbyConfig {
            max_ready: 4,
            rating_tolerance: 200,
            challenge_ttl: Duration::from_millis(20),
            challenge_sweep_interval: Duration::from_secs(5),
            max_rooms: 4,
        })
    }

    fn entry(rating: i32, rated: bool) -> ReadyEntry {
        ReadyEntry {
            user_id: UserId::new_v4(),
            username: format!("p{rating}"),
            rating,
            ready_since: Instant::now(),
            rated,
        }
    }

    #[tokio::test]
    async fn set_ready_dedups_by_user_id() {
        let lobby = lobby();
        let mut e = entry(1200, false);
        e.user_id = UserId::nil();
        lobby.set_ready(e.clone()).await.unwrap();
        e.username = "renamed".into();
        lobby.set_ready(e).await.unwrap();
        assert_eq!(lobby.ready_usernames().await, vec!["renamed".to_string()]);
    }

    #[tokio::test]
    async fn random_match_needs_two_unrated_entries() {
        let lobby = lobby();
        assert!(lobby.find_random_match().await.is_none());
        lobby.set_ready(entry(1200, false)).await.unwrap();
        assert!(lobby.find_random_match().await.is_none());
        lobby.set_ready(entry(1400, false)).await.unwrap();
        let (a, b) = lobby.find_random_match().await.unwrap();
        assert_ne!(a.user_id, b.user_id);
        assert!(lobby.ready_usernames().await.is_empty());
    }

    #[tokio::test]
    async fn rated_match_picks_closest_rating_within_tolerance() {
        let lobby = lobby();
        lobby.set_ready(entry(1000, true)).await.unwrap();
        lobby.set_ready(entry(1900, true)).await.unwrap();
        lobby.set_ready(entry(1050, true)).await.unwrap();

        let (a, b) = lobby.find_rated_match().await.unwrap();
        let mut ratings = [a.rating, b.rating];
        ratings.sort();
        assert_eq!(ratings, [1000, 1050]);
    }

    #[tokio::test]
    async fn room_join_checks_password() {
        let lobby = lobby();
        let host = UserId::new_v4();
        let room = lobby
            .create_room(host, "host".into(), "Casual".into(), Some("secret".into()), false)
            .await
            .unwrap();

        let wrong = lobby
            .join_room(&room.code, UserId::new_v4(), "guest".into(), Some("nope"))
            .await;
        assert!(matches!(wrong, Err(CoreError::WrongPassword)));

        let joined = lobby
            .join_room(&room.code, UserId::new_v4(), "guest".into(), Some("secret"))
            .await
            .unwrap();
        assert_eq!(joined.state, RoomState::Paired);
    }

    #[tokio::test]
    async fn only_host_can_close_room() {
        let lobby = lobby();
        let host = UserId::new_v4();
        let room = lobby
            .create_room(host, "host".into(), "Casual".into(), None, false)
            .await
            .unwrap();

        let err = lobby.close_room(&room.code, UserId::new_v4()).await;
        assert!(matches!(err, Err(CoreError::NotHost)));

        let closed = lobby.close_room(&room.code, host).await.unwrap();
        assert_eq!(closed.code, room.code);
        assert!(lobby.open_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn expired_challenges_are_swept() {
        let lobby = lobby();
        let a = UserId::new_v4();
        let b = UserId::new_v4();
        lobby.create_challenge(a, "a".into(), b, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let expired = lobby.sweep_expired_challenges().await;
        assert_eq!(expired.len(), 1);
    }

    #[test]
    fn constant_time_eq_matches_semantics_of_equality() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
