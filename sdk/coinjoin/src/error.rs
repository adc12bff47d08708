use thiserror::Error;

use shroud_privacy::{ErrorClass, PrivacyError};

use crate::session::SessionFailure;

#[derive(Debug, Error)]
pub enum CoinJoinError {
    #[error(transparent)]
    Privacy(#[from] PrivacyError),

    #[error("coinjoin session failed: {0}")]
    Session(SessionFailure),

    #[error("coinjoin gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: SessionFailure },
}

impl CoinJoinError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CoinJoinError::Privacy(e) => e.class(),
            CoinJoinError::Session(failure) => failure.class(),
            CoinJoinError::RetriesExhausted { last, .. } => last.class(),
        }
    }

    /// Text that may be shown to the user or sent to a peer.
    pub fn public_message(&self) -> &'static str {
        self.class().public_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionError;

    #[test]
    fn test_class_follows_last_failure() {
        let err = CoinJoinError::RetriesExhausted {
            attempts: 3,
            last: SessionFailure {
                session_id: None,
                error: SessionError::Connection("refused".into()),
                after_submission: false,
            },
        };
        assert_eq!(err.class(), ErrorClass::Connection);
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn test_tree_full_is_capacity() {
        let err: CoinJoinError = PrivacyError::TreeFull { capacity: 256 }.into();
        assert_eq!(err.class(), ErrorClass::Capacity);
    }
}
