//! Input shape checks, run before any lock or store work.

use super::error::{GameError, GameResult};
use crate::models::Prediction;

pub const MAX_LEADERBOARD_LIMIT: usize = 100;

pub fn parse_prediction(raw: Option<&str>) -> GameResult<Prediction> {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Err(GameError::validation("prediction", "Prediction is required")),
    };
    Prediction::parse(raw).ok_or_else(|| {
        GameError::validation("prediction", "Prediction must be either 'up' or 'down'")
    })
}

/// Reject empty or whitespace-only identifiers.
pub fn require_id<'a>(field: &'static str, value: &'a str) -> GameResult<&'a str> {
    if value.trim().is_empty() {
        return Err(GameError::validation(field, format!("{field} is required")));
    }
    Ok(value)
}

pub fn require_delay(delay_seconds: i64) -> GameResult<i64> {
    if delay_seconds < 0 {
        return Err(GameError::validation(
            "delaySeconds",
            "Resolution delay must not be negative",
        ));
    }
    Ok(delay_seconds)
}

/// An empty `lastKey` means "first page".
pub fn normalize_last_key(last_key: Option<&str>) -> Option<&str> {
    last_key.filter(|k| !k.trim().is_empty())
}

pub fn leaderboard_limit(limit: usize) -> GameResult<usize> {
    if limit == 0 || limit > MAX_LEADERBOARD_LIMIT {
        return Err(GameError::validation(
            "limit",
            format!("Limit must be between 1 and {MAX_LEADERBOARD_LIMIT}"),
        ));
    }
    Ok(limit)
}
