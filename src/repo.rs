//! Repository boundary.
//!
//! `UserRepo`/`MatchRepo` are the only place the core ever talks to
//! persistent storage. Every method is `async` so a real implementation
//! can sit on a connection pool or `spawn_blocking` without ever
//! stalling the reactor; the bundled `InMemoryRepository` is naturally
//! non-blocking and exists for tests and for running the server without
//! an external database wired up.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::types::{Color, MatchId, MatchResult, MatchSummary, User, UserId};

/// How a rated match concluded, for stats-counter bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// This user won.
    Win,
    /// This user lost.
    Loss,
    /// The match was drawn.
    Draw,
}

/// Account persistence.
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Create a new account. Fails if the username is taken.
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, CoreError>;

    /// Look up an account by username.
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, CoreError>;

    /// Look up an account by id.
    async fn get_user(&self, id: UserId) -> Result<Option<User>, CoreError>;

    /// Persist a new rating for `id`.
    async fn update_rating(&self, id: UserId, rating: i32) -> Result<(), CoreError>;

    /// Increment the win/loss/draw counter matching `outcome` for `id`.
    async fn record_outcome(&self, id: UserId, outcome: Outcome) -> Result<(), CoreError>;

    /// The `limit` highest-rated accounts, descending.
    async fn top_ratings(&self, limit: u32) -> Result<Vec<User>, CoreError>;
}

/// Full persistence boundary: accounts plus match history. `Core` holds
/// a single `Arc<dyn Repository>` rather than two separate trait objects.
pub trait Repository: UserRepo + MatchRepo {}

impl<T: UserRepo + MatchRepo> Repository for T {}

/// Match persistence, written only on a terminal state transition.
#[async_trait]
pub trait MatchRepo: Send + Sync {
    /// Record a finished match's outcome for later history queries.
    async fn persist_match(
        &self,
        match_id: MatchId,
        red: UserId,
        black: UserId,
        result: MatchResult,
        rated: bool,
        ended_at: i64,
    ) -> Result<(), CoreError>;

    /// Match history for `user_id`, newest first.
    async fn match_history(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MatchSummary>, CoreError>;
}

#[derive(Clone)]
struct StoredMatch {
    match_id: MatchId,
    red: UserId,
    black: UserId,
    result: MatchResult,
    rated: bool,
    ended_at: i64,
}

/// Non-persistent reference implementation of both repositories, backed
/// by in-process tables. Safe to share across connections via `Arc`.
#[derive(Default)]
pub struct InMemoryRepository {
    users_by_id: RwLock<BTreeMap<UserId, User>>,
    usernames: RwLock<BTreeMap<String, UserId>>,
    matches: RwLock<Vec<StoredMatch>>,
}

impl InMemoryRepository {
    /// Build an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepo for InMemoryRepository {
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, CoreError> {
        let mut usernames = self.usernames.write().await;
        if usernames.contains_key(username) {
            return Err(CoreError::UsernameTaken);
        }
        let user = User {
            id: UserId::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            rating: User::DEFAULT_RATING,
            wins: 0,
            losses: 0,
            draws: 0,
        };
        usernames.insert(username.to_string(), user.id);
        self.users_by_id.write().await.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, CoreError> {
        let usernames = self.usernames.read().await;
        match usernames.get(username) {
            Some(id) => Ok(self.users_by_id.read().await.get(id).cloned()),
            None => Ok(None),
        }
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, CoreError> {
        Ok(self.users_by_id.read().await.get(&id).cloned())
    }

    async fn update_rating(&self, id: UserId, rating: i32) -> Result<(), CoreError> {
        let mut users = self.users_by_id.write().await;
        match users.get_mut(&id) {
            Some(user) => {
                user.rating = rating;
                Ok(())
            }
            None => Err(CoreError::Repository("unknown user".into())),
        }
    }

    async fn record_outcome(&self, id: UserId, outcome: Outcome) -> Result<(), CoreError> {
        let mut users = self.users_by_id.write().await;
        match users.get_mut(&id) {
            Some(user) => {
                match outcome {
                    Outcome::Win => user.wins += 1,
                    Outcome::Loss => user.losses += 1,
                    Outcome::Draw => user.draws += 1,
                }
                Ok(())
            }
            None => Err(CoreError::Repository("unknown user".into())),
        }
    }

    async fn top_ratings(&self, limit: u32) -> Result<Vec<User>, CoreError> {
        let users = self.users_by_id.read().await;
        let mut all: Vec<User> = users.values().cloned().collect();
        all.sort_by(|a, b| b.rating.cmp(&a.rating));
        all.truncate(limit as usize);
        Ok(all)
    }
}

#[async_trait]
impl MatchRepo for InMemoryRepository {
    async fn persist_match(
        &self,
        match_id: MatchId,
        red: UserId,
        black: UserId,
        result: MatchResult,
        rated: bool,
        ended_at: i64,
    ) -> Result<(), CoreError> {
        self.matches.write().await.push(StoredMatch {
            match_id,
            red,
            black,
            result,
            rated,
            ended_at,
        });
        Ok(())
    }

    async fn match_history(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MatchSummary>, CoreError> {
        let matches = self.matches.read().await;
        let users = self.users_by_id.read().await;

        let mut rows: Vec<MatchSummary> = matches
            .iter()
            .rev()
            .filter(|m| m.red == user_id || m.black == user_id)
            .skip(offset as usize)
            .take(limit as usize)
            .map(|m| {
                let (color, opponent_id) = if m.red == user_id {
                    (Color::Red, m.black)
                } else {
                    (Color::Black, m.red)
                };
                let opponent = users
                    .get(&opponent_id)
                    .map(|u| u.username.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                MatchSummary {
                    match_id: m.match_id,
                    opponent,
                    color,
                    result: Some(m.result),
                    rated: m.rated,
                    ended_at: Some(m.ended_at),
                }
            })
            .collect();
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_user_rejects_duplicate_usernames() {
        let repo = InMemoryRepository::new();
        repo.create_user("alice", "hash").await.unwrap();
        let err = repo.create_user("alice", "hash2").await;
        assert!(matches!(err, Err(CoreError::UsernameTaken)));
    }

    #[tokio::test]
    async fn record_outcome_updates_counters() {
        let repo = InMemoryRepository::new();
        let user = repo.create_user("bob", "hash").await.unwrap();
        repo.record_outcome(user.id, Outcome::Win).await.unwrap();
        repo.record_outcome(user.id, Outcome::Draw).await.unwrap();
        let refreshed = repo.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(refreshed.wins, 1);
        assert_eq!(refreshed.draws, 1);
        assert_eq!(refreshed.losses, 0);
    }

    #[tokio::test]
    async fn top_ratings_sorts_descending_and_truncates() {
        let repo = InMemoryRepository::new();
        let a = repo.create_user("a", "h").await.unwrap();
        let b = repo.create_user("b", "h").await.unwrap();
        repo.update_rating(a.id, 1500).await.unwrap();
        repo.update_rating(b.id, 1800).await.unwrap();

        let top = repo.top_ratings(1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].username, "b");
    }

    #[tokio::test]
    async fn match_history_returns_newest_first_and_paginates() {
        let repo = InMemoryRepository::new();
        let a = repo.create_user("a", "h").await.unwrap();
        let b = repo.create_user("b", "h").await.unwrap();

        for i in 0..3 {
            repo.persist_match(MatchId::new_v4(), a.id, b.id, MatchResult::RedWins, true, i)
                .await
                .unwrap();
        }

        let page = repo.match_history(a.id, 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].ended_at, Some(2));
        assert_eq!(page[1].ended_at, Some(1));
    }
}
