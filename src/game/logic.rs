//! Outcome and scoring rules

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::models::{GuessResult, Prediction};

const GUESS_ID_SUFFIX_LEN: usize = 12;

/// Correct when the price moved the predicted way. An unchanged price counts as "down".
pub fn determine_result(prediction: Prediction, initial_price: f64, resolved_price: f64) -> GuessResult {
    let price_went_up = resolved_price > initial_price;
    match (prediction, price_went_up) {
        (Prediction::Up, true) | (Prediction::Down, false) => GuessResult::Correct,
        _ => GuessResult::Incorrect,
    }
}

pub fn score_change(result: GuessResult) -> i64 {
    match result {
        GuessResult::Correct => 1,
        GuessResult::Incorrect => -1,
    }
}

/// Zero the delta if applying it would take the score below zero.
pub fn clamp_score_change(current_score: i64, delta: i64) -> i64 {
    if current_score.saturating_add(delta) < 0 {
        0
    } else {
        delta
    }
}

/// `guess_<unix millis>_<random alphanumerics>`.
///
/// Ids sort by creation time (fixed-width millis until the year 2286), which
/// history paging relies on.
pub fn generate_guess_id(now_ms: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GUESS_ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("guess_{now_ms}_{}", suffix.to_lowercase())
}

/// Positive finite prices only.
pub fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_up_prediction() {
        assert_eq!(determine_result(Prediction::Up, 50_000.0, 52_000.0), GuessResult::Correct);
        assert_eq!(determine_result(Prediction::Up, 50_000.0, 48_000.0), GuessResult::Incorrect);
        assert_eq!(determine_result(Prediction::Up, 50_000.0, 50_000.0), GuessResult::Incorrect);
    }

    #[test]
    fn test_down_prediction() {
        assert_eq!(determine_result(Prediction::Down, 50_000.0, 48_000.0), GuessResult::Correct);
        assert_eq!(determine_result(Prediction::Down, 50_000.0, 52_000.0), GuessResult::Incorrect);
        assert_eq!(determine_result(Prediction::Down, 50_000.0, 50_000.0), GuessResult::Correct);
    }

    #[test]
    fn test_score_change_and_floor() {
        assert_eq!(score_change(GuessResult::Correct), 1);
        assert_eq!(score_change(GuessResult::Incorrect), -1);

        assert_eq!(clamp_score_change(0, -1), 0);
        assert_eq!(clamp_score_change(1, -1), -1);
        assert_eq!(clamp_score_change(0, 1), 1);
        assert_eq!(clamp_score_change(7, 1), 1);
    }

    #[test]
    fn test_guess_ids_are_unique_and_ordered() {
        let ids: HashSet<String> = (0..1_000).map(|_| generate_guess_id(1_700_000_000_000)).collect();
        assert_eq!(ids.len(), 1_000);

        let earlier = generate_guess_id(1_700_000_000_000);
        let later = generate_guess_id(1_700_000_000_001);
        assert!(earlier.starts_with("guess_1700000000000_"));
        assert!(earlier < later);
    }

    #[test]
    fn test_price_validation() {
        assert!(is_valid_price(61_000.25));
        assert!(!is_valid_price(0.0));
        assert!(!is_valid_price(-3.0));
        assert!(!is_valid_price(f64::NAN));
        assert!(!is_valid_price(f64::INFINITY));
    }
}
