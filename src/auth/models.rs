//! Token claims

use serde::{Deserialize, Serialize};

/// JWT claims. `sub` is the player uid the game operates on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}
