//! Prediction game engine: advisory locks, scoring rules and the guess lifecycle.

pub mod clock;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod logic;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, GameError, GameResult};
pub use lifecycle::{GuessLifecycle, ResolveOutcome};
pub use lock::LockManager;
