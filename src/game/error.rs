use thiserror::Error;

use crate::store::StoreError;
use crate::tasks::SchedulingError;

/// Coarse class of a `GameError`, used by the transport to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Contention,
    BusinessRule,
    Store,
    Scheduling,
}

#[derive(Debug, Error)]
pub enum GameError {
    #[error("{message}")]
    Validation {
        field: Option<&'static str>,
        message: String,
    },

    #[error("another guess operation is in progress")]
    Contention { lock_key: String },

    #[error("user already has an active guess")]
    ActiveGuessExists { user_id: String },

    #[error("guess {guess_id} cannot be resolved before {eligible_at} (now {now})")]
    TooEarly {
        guess_id: String,
        eligible_at: i64,
        now: i64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

impl GameError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        GameError::Validation {
            field: Some(field),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GameError::Validation { .. } => ErrorKind::Validation,
            GameError::Contention { .. } => ErrorKind::Contention,
            GameError::ActiveGuessExists { .. } | GameError::TooEarly { .. } => {
                ErrorKind::BusinessRule
            }
            GameError::Store(_) => ErrorKind::Store,
            GameError::Scheduling(_) => ErrorKind::Scheduling,
        }
    }
}

pub type GameResult<T> = std::result::Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            GameError::validation("prediction", "bad").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            GameError::Contention {
                lock_key: "user-guess:a".to_string()
            }
            .kind(),
            ErrorKind::Contention
        );
        assert_eq!(
            GameError::ActiveGuessExists {
                user_id: "a".to_string()
            }
            .kind(),
            ErrorKind::BusinessRule
        );

        let store: GameError = StoreError::new("getUser", "io").into();
        assert_eq!(store.kind(), ErrorKind::Store);

        let sched: GameError = SchedulingError::QueueClosed.into();
        assert_eq!(sched.kind(), ErrorKind::Scheduling);
    }

    #[test]
    fn test_messages() {
        let err = GameError::ActiveGuessExists {
            user_id: "a".to_string(),
        };
        assert_eq!(err.to_string(), "user already has an active guess");

        let err = GameError::Contention {
            lock_key: "user-guess:a".to_string(),
        };
        assert_eq!(err.to_string(), "another guess operation is in progress");
    }
}
