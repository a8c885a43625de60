//! In-process store
//!
//! Everything lives behind one mutex, so each call is linearizable. Used for
//! `STORE_BACKEND=memory` and throughout the tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{GuessStore, LockStore, LockUpdate, Mutation, StoreError, Transaction, UpdateBatch};
use crate::models::{Guess, LockRecord, User};

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<String, User>,
    /// uid -> guess id -> guess
    guesses: BTreeMap<String, BTreeMap<String, Guess>>,
    locks: HashMap<String, LockRecord>,
    price: Option<f64>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(price: f64) -> Self {
        let store = Self::new();
        store.state.lock().price = Some(price);
        store
    }

    /// Overwrite the stored price without validation (tests use this to plant bad values).
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_price(&self, price: Option<f64>) {
        self.state.lock().price = price;
    }

    /// Current lock marker, if any (expired or not).
    #[cfg(any(test, feature = "test-util"))]
    pub fn lock_record(&self, key: &str) -> Option<LockRecord> {
        self.state.lock().locks.get(key).copied()
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn put_lock(&self, key: &str, record: LockRecord) {
        self.state.lock().locks.insert(key.to_string(), record);
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn guess_count(&self, uid: &str) -> usize {
        self.state
            .lock()
            .guesses
            .get(uid)
            .map(|g| g.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn transact(
        &self,
        key: &str,
        update: LockUpdate<'_>,
    ) -> Result<Transaction<LockRecord>, StoreError> {
        let mut state = self.state.lock();
        let current = state.locks.get(key).copied();

        match update(current.as_ref()) {
            Some(next) => {
                state.locks.insert(key.to_string(), next);
                Ok(Transaction {
                    committed: true,
                    snapshot: Some(next),
                })
            }
            None => Ok(Transaction {
                committed: false,
                snapshot: current,
            }),
        }
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.state.lock().locks.remove(key);
        Ok(())
    }
}

#[async_trait]
impl GuessStore for MemoryStore {
    async fn get_user(&self, uid: &str) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().users.get(uid).cloned())
    }

    async fn get_user_score(&self, uid: &str) -> Result<i64, StoreError> {
        Ok(self
            .state
            .lock()
            .users
            .get(uid)
            .map(|u| u.score)
            .unwrap_or(0))
    }

    async fn get_guess(&self, uid: &str, guess_id: &str) -> Result<Option<Guess>, StoreError> {
        Ok(self
            .state
            .lock()
            .guesses
            .get(uid)
            .and_then(|g| g.get(guess_id))
            .cloned())
    }

    async fn current_price(&self) -> Result<Option<f64>, StoreError> {
        Ok(self.state.lock().price)
    }

    async fn record_price(&self, price: f64) -> Result<(), StoreError> {
        self.state.lock().price = Some(price);
        Ok(())
    }

    async fn commit(&self, batch: UpdateBatch) -> Result<(), StoreError> {
        let mut state = self.state.lock();

        // Check every precondition before touching anything.
        let mut known: HashSet<&str> = HashSet::new();
        for mutation in batch.mutations() {
            match mutation {
                Mutation::CreateUser(user) => {
                    known.insert(user.uid.as_str());
                }
                Mutation::SetActiveGuess { uid, .. } | Mutation::SetScore { uid, .. } => {
                    if !known.contains(uid.as_str()) && !state.users.contains_key(uid) {
                        return Err(StoreError::new(
                            "atomicUpdate",
                            format!("user {uid} does not exist"),
                        ));
                    }
                }
                Mutation::PutGuess(_) => {}
            }
        }

        for mutation in batch.mutations() {
            match mutation {
                Mutation::CreateUser(user) => {
                    state.users.insert(user.uid.clone(), user.clone());
                }
                Mutation::PutGuess(guess) => {
                    state
                        .guesses
                        .entry(guess.user_id.clone())
                        .or_default()
                        .insert(guess.id.clone(), guess.clone());
                }
                Mutation::SetActiveGuess { uid, guess_id } => {
                    if let Some(user) = state.users.get_mut(uid) {
                        user.active_guess_id = guess_id.clone();
                    }
                }
                Mutation::SetScore { uid, score } => {
                    if let Some(user) = state.users.get_mut(uid) {
                        user.score = *score;
                    }
                }
            }
        }

        Ok(())
    }

    async fn top_users(&self, limit: usize) -> Result<Vec<User>, StoreError> {
        let state = self.state.lock();
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.uid.cmp(&b.uid)));
        users.truncate(limit);
        Ok(users)
    }

    async fn guesses_before(
        &self,
        uid: &str,
        end_before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Guess>, StoreError> {
        let state = self.state.lock();
        let Some(guesses) = state.guesses.get(uid) else {
            return Ok(Vec::new());
        };

        let page = guesses
            .iter()
            .rev()
            .filter(|(id, _)| end_before.map_or(true, |end| id.as_str() < end))
            .take(limit)
            .map(|(_, g)| g.clone())
            .collect();
        Ok(page)
    }

    async fn pending_guesses(&self) -> Result<Vec<Guess>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .guesses
            .values()
            .flat_map(|g| g.values())
            .filter(|g| g.is_pending())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Prediction;

    fn guess(uid: &str, id: &str) -> Guess {
        Guess::pending(
            id.to_string(),
            uid.to_string(),
            Prediction::Up,
            100.0,
            0,
            15,
        )
    }

    #[tokio::test]
    async fn test_transact_commits_and_aborts() {
        let store = MemoryStore::new();

        let tx = store
            .transact("k", &|_| Some(LockRecord { timestamp: 5 }))
            .await
            .unwrap();
        assert!(tx.committed);
        assert_eq!(tx.snapshot, Some(LockRecord { timestamp: 5 }));

        let tx = store.transact("k", &|_| None).await.unwrap();
        assert!(!tx.committed);
        assert_eq!(tx.snapshot, Some(LockRecord { timestamp: 5 }));

        store.clear("k").await.unwrap();
        store.clear("k").await.unwrap();
        assert!(store.lock_record("k").is_none());
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let store = MemoryStore::new();

        // Second mutation targets a user that doesn't exist, so the guess must not land either.
        let batch = UpdateBatch::new()
            .push(Mutation::PutGuess(guess("ghost", "guess_1")))
            .push(Mutation::SetActiveGuess {
                uid: "ghost".to_string(),
                guess_id: Some("guess_1".to_string()),
            });
        let err = store.commit(batch).await.unwrap_err();
        assert_eq!(err.operation, "atomicUpdate");
        assert!(store.get_guess("ghost", "guess_1").await.unwrap().is_none());

        let batch = UpdateBatch::new()
            .push(Mutation::PutGuess(guess("alice", "guess_1")))
            .push(Mutation::CreateUser(User::new("alice")))
            .push(Mutation::SetActiveGuess {
                uid: "alice".to_string(),
                guess_id: Some("guess_1".to_string()),
            });
        store.commit(batch).await.unwrap();
        let user = store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.active_guess_id.as_deref(), Some("guess_1"));
    }

    #[tokio::test]
    async fn test_history_is_reverse_key_order() {
        let store = MemoryStore::new();
        let mut batch = UpdateBatch::new();
        for i in 1..=4 {
            batch = batch.push(Mutation::PutGuess(guess("bob", &format!("guess_{i}"))));
        }
        store.commit(batch).await.unwrap();

        let page = store.guesses_before("bob", None, 3).await.unwrap();
        let ids: Vec<&str> = page.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["guess_4", "guess_3", "guess_2"]);

        let page = store.guesses_before("bob", Some("guess_2"), 3).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "guess_1");

        assert!(store.guesses_before("nobody", None, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_users_order() {
        let store = MemoryStore::new();
        let users = [("carol", 2), ("alice", 5), ("bob", 2), ("dave", 0)];
        let mut batch = UpdateBatch::new();
        for (uid, score) in users {
            batch = batch.push(Mutation::CreateUser(User {
                uid: uid.to_string(),
                score,
                active_guess_id: None,
            }));
        }
        store.commit(batch).await.unwrap();

        let top = store.top_users(3).await.unwrap();
        let uids: Vec<&str> = top.iter().map(|u| u.uid.as_str()).collect();
        assert_eq!(uids, vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_missing_user_score_is_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.get_user_score("nobody").await.unwrap(), 0);
        assert_eq!(store.current_price().await.unwrap(), None);
        store.record_price(42_000.5).await.unwrap();
        assert_eq!(store.current_price().await.unwrap(), Some(42_000.5));
    }
}
