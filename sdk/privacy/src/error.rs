//! Error taxonomy shared by every Shroud crate.
//!
//! Each crate has its own `thiserror` enum; all of them map onto an
//! [`ErrorClass`] which drives retry policy and what may be shown to a user.

use thiserror::Error;

/// Broad failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Transient transport failure, retry with a fresh randomized delay.
    Connection,
    /// Invalid transition or malformed message.
    Protocol,
    /// Self-verification or commitment mismatch. Never retried.
    Cryptographic,
    /// Ledger submission or confirmation failure, retried up to a bound.
    Ledger,
    /// Pool capacity exhausted, needs an operator.
    Capacity,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Connection | ErrorClass::Ledger)
    }

    /// Stable code reported to users and logs.
    pub fn code(self) -> &'static str {
        match self {
            ErrorClass::Connection => "E_CONN",
            ErrorClass::Protocol => "E_PROTO",
            ErrorClass::Cryptographic => "E_CRYPTO",
            ErrorClass::Ledger => "E_LEDGER",
            ErrorClass::Capacity => "E_CAPACITY",
        }
    }

    /// Generic message shown instead of the internal error text.
    pub fn public_message(self) -> &'static str {
        match self {
            ErrorClass::Connection => "coordinator unreachable",
            ErrorClass::Protocol => "coordination session failed",
            ErrorClass::Cryptographic => "cryptographic verification failed",
            ErrorClass::Ledger => "ledger operation failed",
            ErrorClass::Capacity => "shielded pool is full",
        }
    }

    /// Cryptographic and capacity failures are only ever reported by code.
    pub fn is_opaque(self) -> bool {
        matches!(self, ErrorClass::Cryptographic | ErrorClass::Capacity)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.public_message())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrivacyError {
    #[error("secure random source failed")]
    Entropy,

    #[error("denomination {0} is not accepted by the pool")]
    InvalidDenomination(u64),

    #[error("merkle tree is full ({capacity} leaves)")]
    TreeFull { capacity: u64 },

    #[error("tree depth {0} is outside 1..=32")]
    InvalidDepth(usize),

    #[error("leaf {0} has not been inserted")]
    UnknownLeaf(u64),

    #[error("authentication path for leaf {0} is not available from a compact snapshot")]
    PathUnavailable(u64),

    #[error("invalid tree snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("note has not been inserted into the tree")]
    NoteNotInserted,

    #[error("invalid curve point")]
    InvalidPoint,

    #[error("invalid meta-address: {0}")]
    InvalidMetaAddress(String),

    #[error("invalid view key: {0}")]
    InvalidViewKey(String),

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
}

impl PrivacyError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PrivacyError::TreeFull { .. } => ErrorClass::Capacity,
            PrivacyError::InvalidDenomination(_)
            | PrivacyError::UnknownLeaf(_)
            | PrivacyError::PathUnavailable(_)
            | PrivacyError::InvalidDepth(_)
            | PrivacyError::InvalidSnapshot(_)
            | PrivacyError::NoteNotInserted
            | PrivacyError::InvalidMetaAddress(_)
            | PrivacyError::InvalidViewKey(_)
            | PrivacyError::InvalidMnemonic(_) => ErrorClass::Protocol,
            PrivacyError::Entropy | PrivacyError::InvalidPoint => ErrorClass::Cryptographic,
        }
    }
}
