//! SQLite-backed store
//!
//! One connection guarded by an async mutex. Lock markers use an optimistic
//! version check on the stored timestamp so several processes may share the
//! same database file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    GuessStore, LockStore, LockUpdate, Mutation, StoreError, Transaction, UpdateBatch,
    MAX_TRANSACTION_ATTEMPTS,
};
use crate::models::{Guess, GuessResult, GuessStatus, LockRecord, Prediction, User};

const GUESS_COLUMNS: &str = "id, user_id, prediction, initial_price, created_at, status,
     resolved_price, resolved_at, result, resolution_delay_seconds";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open game db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("set busy timeout")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                uid TEXT PRIMARY KEY,
                score INTEGER NOT NULL DEFAULT 0,
                active_guess_id TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_users_score ON users(score DESC, uid ASC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS guesses (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                prediction TEXT NOT NULL,
                initial_price REAL NOT NULL,
                created_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                resolved_price REAL,
                resolved_at INTEGER,
                result TEXT,
                resolution_delay_seconds INTEGER NOT NULL,
                PRIMARY KEY (user_id, id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_guesses_status ON guesses(status)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS locks (
                key TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS prices (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                price REAL NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn conversion_error(idx: usize, what: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(StoreError::new("decode", format!("invalid {what}: {raw}"))),
    )
}

fn row_to_guess(row: &Row<'_>) -> rusqlite::Result<Guess> {
    let prediction: String = row.get(2)?;
    let status: String = row.get(5)?;
    let result: Option<String> = row.get(8)?;

    Ok(Guess {
        id: row.get(0)?,
        user_id: row.get(1)?,
        prediction: Prediction::parse(&prediction)
            .ok_or_else(|| conversion_error(2, "prediction", &prediction))?,
        initial_price: row.get(3)?,
        created_at: row.get(4)?,
        status: GuessStatus::parse(&status).ok_or_else(|| conversion_error(5, "status", &status))?,
        resolved_price: row.get(6)?,
        resolved_at: row.get(7)?,
        result: match result {
            Some(raw) => {
                Some(GuessResult::parse(&raw).ok_or_else(|| conversion_error(8, "result", &raw))?)
            }
            None => None,
        },
        resolution_delay_seconds: row.get(9)?,
    })
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        uid: row.get(0)?,
        score: row.get(1)?,
        active_guess_id: row.get(2)?,
    })
}

fn read_lock(conn: &Connection, key: &str) -> rusqlite::Result<Option<LockRecord>> {
    conn.query_row(
        "SELECT timestamp FROM locks WHERE key = ?1",
        params![key],
        |row| Ok(LockRecord { timestamp: row.get(0)? }),
    )
    .optional()
}

fn store_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::new(operation, e.to_string())
}

fn apply_mutation(tx: &rusqlite::Transaction<'_>, mutation: &Mutation) -> Result<(), StoreError> {
    let op = "atomicUpdate";
    match mutation {
        Mutation::CreateUser(user) => {
            tx.execute(
                "INSERT OR REPLACE INTO users (uid, score, active_guess_id) VALUES (?1, ?2, ?3)",
                params![user.uid, user.score, user.active_guess_id],
            )
            .map_err(store_err(op))?;
        }
        Mutation::PutGuess(guess) => {
            tx.execute(
                "INSERT OR REPLACE INTO guesses (id, user_id, prediction, initial_price, created_at,
                     status, resolved_price, resolved_at, result, resolution_delay_seconds)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    guess.id,
                    guess.user_id,
                    guess.prediction.as_str(),
                    guess.initial_price,
                    guess.created_at,
                    guess.status.as_str(),
                    guess.resolved_price,
                    guess.resolved_at,
                    guess.result.map(|r| r.as_str()),
                    guess.resolution_delay_seconds,
                ],
            )
            .map_err(store_err(op))?;
        }
        Mutation::SetActiveGuess { uid, guess_id } => {
            let rows = tx
                .execute(
                    "UPDATE users SET active_guess_id = ?1 WHERE uid = ?2",
                    params![guess_id, uid],
                )
                .map_err(store_err(op))?;
            if rows == 0 {
                return Err(StoreError::new(op, format!("user {uid} does not exist")));
            }
        }
        Mutation::SetScore { uid, score } => {
            let rows = tx
                .execute(
                    "UPDATE users SET score = ?1 WHERE uid = ?2",
                    params![score, uid],
                )
                .map_err(store_err(op))?;
            if rows == 0 {
                return Err(StoreError::new(op, format!("user {uid} does not exist")));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl LockStore for SqliteStore {
    async fn transact(
        &self,
        key: &str,
        update: LockUpdate<'_>,
    ) -> Result<Transaction<LockRecord>, StoreError> {
        let op = "transactionUpdate";
        let conn = self.conn.lock().await;

        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let current = read_lock(&conn, key).map_err(store_err(op))?;
            let Some(next) = update(current.as_ref()) else {
                return Ok(Transaction {
                    committed: false,
                    snapshot: current,
                });
            };

            // Only write if the row still holds the value `update` decided on.
            let written = match current {
                None => conn.execute(
                    "INSERT OR IGNORE INTO locks (key, timestamp) VALUES (?1, ?2)",
                    params![key, next.timestamp],
                ),
                Some(prev) => conn.execute(
                    "UPDATE locks SET timestamp = ?1 WHERE key = ?2 AND timestamp = ?3",
                    params![next.timestamp, key, prev.timestamp],
                ),
            }
            .map_err(store_err(op))?;

            if written == 1 {
                return Ok(Transaction {
                    committed: true,
                    snapshot: Some(next),
                });
            }
            debug!(lock_key = key, attempt, "lock write lost a race, retrying");
        }

        Err(StoreError::new(
            op,
            format!("gave up on locks/{key} after {MAX_TRANSACTION_ATTEMPTS} conflicting attempts"),
        ))
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM locks WHERE key = ?1", params![key])
            .map_err(store_err("releaseLock"))?;
        Ok(())
    }
}

#[async_trait]
impl GuessStore for SqliteStore {
    async fn get_user(&self, uid: &str) -> Result<Option<User>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT uid, score, active_guess_id FROM users WHERE uid = ?1",
            params![uid],
            row_to_user,
        )
        .optional()
        .map_err(store_err("getUser"))
    }

    async fn get_user_score(&self, uid: &str) -> Result<i64, StoreError> {
        let conn = self.conn.lock().await;
        let score: Option<i64> = conn
            .query_row(
                "SELECT score FROM users WHERE uid = ?1",
                params![uid],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err("getUserScore"))?;
        Ok(score.unwrap_or(0))
    }

    async fn get_guess(&self, uid: &str, guess_id: &str) -> Result<Option<Guess>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {GUESS_COLUMNS} FROM guesses WHERE user_id = ?1 AND id = ?2"),
            params![uid, guess_id],
            row_to_guess,
        )
        .optional()
        .map_err(store_err("getGuess"))
    }

    async fn current_price(&self) -> Result<Option<f64>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT price FROM prices WHERE id = 1", [], |row| row.get(0))
            .optional()
            .map_err(store_err("getPrice"))
    }

    async fn record_price(&self, price: f64) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO prices (id, price, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET price = excluded.price, updated_at = excluded.updated_at",
            params![price, Utc::now().timestamp_millis()],
        )
        .map_err(store_err("recordPrice"))?;
        Ok(())
    }

    async fn commit(&self, batch: UpdateBatch) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(store_err("atomicUpdate"))?;

        // Any error drops `tx`, which rolls the whole batch back.
        for mutation in batch.mutations() {
            apply_mutation(&tx, mutation)?;
        }

        tx.commit().map_err(store_err("atomicUpdate"))
    }

    async fn top_users(&self, limit: usize) -> Result<Vec<User>, StoreError> {
        let op = "getLeaderboard";
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached(
                "SELECT uid, score, active_guess_id FROM users
                 ORDER BY score DESC, uid ASC LIMIT ?1",
            )
            .map_err(store_err(op))?;
        let users = stmt
            .query_map(params![limit as i64], row_to_user)
            .map_err(store_err(op))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err(op))?;
        Ok(users)
    }

    async fn guesses_before(
        &self,
        uid: &str,
        end_before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Guess>, StoreError> {
        let op = "getGuessHistory";
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {GUESS_COLUMNS} FROM guesses
                 WHERE user_id = ?1 AND (?2 IS NULL OR id < ?2)
                 ORDER BY id DESC LIMIT ?3"
            ))
            .map_err(store_err(op))?;
        let guesses = stmt
            .query_map(params![uid, end_before, limit as i64], row_to_guess)
            .map_err(store_err(op))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err(op))?;
        Ok(guesses)
    }

    async fn pending_guesses(&self) -> Result<Vec<Guess>, StoreError> {
        let op = "getPendingGuesses";
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {GUESS_COLUMNS} FROM guesses WHERE status = 'pending' ORDER BY created_at ASC"
            ))
            .map_err(store_err(op))?;
        let guesses = stmt
            .query_map([], row_to_guess)
            .map_err(store_err(op))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err(op))?;
        Ok(guesses)
    }
}
