use serde::{Deserialize, Serialize};

/// Direction a user commits to for the reference price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Prediction {
    Up,
    Down,
}

impl Prediction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prediction::Up => "up",
            Prediction::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Prediction::Up),
            "down" => Some(Prediction::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GuessStatus {
    Pending,
    Resolved,
}

impl GuessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuessStatus::Pending => "pending",
            GuessStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(GuessStatus::Pending),
            "resolved" => Some(GuessStatus::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GuessResult {
    Correct,
    Incorrect,
}

impl GuessResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuessResult::Correct => "correct",
            GuessResult::Incorrect => "incorrect",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "correct" => Some(GuessResult::Correct),
            "incorrect" => Some(GuessResult::Incorrect),
            _ => None,
        }
    }
}

/// Player record stored at `users/<uid>`.
///
/// `active_guess_id` is set exactly while the user owns a pending guess.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub score: i64,
    pub active_guess_id: Option<String>,
}

impl User {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            score: 0,
            active_guess_id: None,
        }
    }
}

/// A single prediction stored at `guesses/<uid>/<id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Guess {
    pub id: String,
    pub user_id: String,
    pub prediction: Prediction,
    pub initial_price: f64,
    /// Unix millis.
    pub created_at: i64,
    pub status: GuessStatus,
    pub resolved_price: Option<f64>,
    pub resolved_at: Option<i64>,
    pub result: Option<GuessResult>,
    pub resolution_delay_seconds: i64,
}

impl Guess {
    pub fn pending(
        id: String,
        user_id: String,
        prediction: Prediction,
        initial_price: f64,
        created_at: i64,
        resolution_delay_seconds: i64,
    ) -> Self {
        Self {
            id,
            user_id,
            prediction,
            initial_price,
            created_at,
            status: GuessStatus::Pending,
            resolved_price: None,
            resolved_at: None,
            result: None,
            resolution_delay_seconds,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == GuessStatus::Pending
    }

    /// Earliest unix millis at which this guess may be resolved.
    pub fn eligible_at(&self) -> i64 {
        self.created_at
            .saturating_add(self.resolution_delay_seconds.saturating_mul(1000))
    }
}

/// Advisory lock marker stored at `locks/<key>`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRecord {
    /// Unix millis at which the holder acquired the lock.
    pub timestamp: i64,
}

// ===== API response shapes =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MakeGuessResponse {
    pub success: bool,
    pub guess_id: String,
    pub initial_price: f64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolveGuessResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<GuessResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_change: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub uid: String,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardResponse {
    pub success: bool,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Public view of a stored guess; the resolution delay stays internal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GuessHistoryEntry {
    pub id: String,
    pub user_id: String,
    pub prediction: Prediction,
    pub initial_price: f64,
    pub created_at: i64,
    pub status: GuessStatus,
    pub resolved_price: Option<f64>,
    pub resolved_at: Option<i64>,
    pub result: Option<GuessResult>,
}

impl From<Guess> for GuessHistoryEntry {
    fn from(guess: Guess) -> Self {
        Self {
            id: guess.id,
            user_id: guess.user_id,
            prediction: guess.prediction,
            initial_price: guess.initial_price,
            created_at: guess.created_at,
            status: guess.status,
            resolved_price: guess.resolved_price,
            resolved_at: guess.resolved_at,
            result: guess.result,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GuessHistoryResponse {
    pub success: bool,
    pub guesses: Vec<GuessHistoryEntry>,
    pub has_next_page: bool,
    pub next_page_key: Option<String>,
}
