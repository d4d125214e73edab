//! Error handling for the ledger
//!
//! This module provides the error taxonomy for every ledger operation:
//! validation, lookups, state transitions, chain integrity and persistence.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Rejections raised before anything is written
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A required transaction field was absent or blank
    MissingField(&'static str),
    /// A field was present but unusable
    InvalidField { field: &'static str, reason: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingField(name) => write!(f, "missing required field: {name}"),
            ValidationError::InvalidField { field, reason } => {
                write!(f, "invalid field {field}: {reason}")
            }
        }
    }
}

/// Operations refused because of the current state of a record
#[derive(Debug, Clone, PartialEq)]
pub enum StateError {
    AlreadyExecuted(String),
    NoPendingTransactions,
    AlreadyApproved(String),
    NotConfirmed(String),
    ConditionsNotMet { contract_id: String, reason: String },
    /// Several id-less legacy rows could belong to the same transaction
    AmbiguousMatch {
        transaction_id: String,
        candidates: usize,
    },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::AlreadyExecuted(id) => write!(f, "contract {id} is already executed"),
            StateError::NoPendingTransactions => write!(f, "no pending transactions to mine"),
            StateError::AlreadyApproved(id) => write!(f, "transaction {id} is already approved"),
            StateError::NotConfirmed(id) => {
                write!(f, "transaction {id} has not been confirmed in a block")
            }
            StateError::ConditionsNotMet {
                contract_id,
                reason,
            } => write!(f, "contract {contract_id} conditions not met: {reason}"),
            StateError::AmbiguousMatch {
                transaction_id,
                candidates,
            } => write!(
                f,
                "{candidates} legacy rows could match transaction {transaction_id}"
            ),
        }
    }
}

/// Chain verification failures, reported by `Blockchain::verify`
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrityError {
    /// Stored hash differs from the recomputed digest
    HashMismatch { index: u64 },
    /// `previous_hash` does not point at the preceding block
    BrokenLink { index: u64 },
    /// Rows exist in the block table but none could be read
    Unreadable,
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityError::HashMismatch { index } => write!(f, "invalid hash for block {index}"),
            IntegrityError::BrokenLink { index } => {
                write!(f, "invalid previous hash reference for block {index}")
            }
            IntegrityError::Unreadable => write!(f, "no readable block in the block table"),
        }
    }
}

/// Error types for ledger operations
#[derive(Debug, Clone)]
pub enum LedgerError {
    Validation(ValidationError),
    /// Unknown contract, transaction or legacy row
    NotFound { kind: &'static str, id: String },
    State(StateError),
    Integrity(IntegrityError),
    /// Database-related errors
    Database(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Configuration errors
    Config(String),
    /// The chain side committed but the legacy table could not follow
    Divergence {
        transaction_id: String,
        reason: String,
    },
    /// Mining was cancelled or ran past its deadline
    Cancelled,
}

impl LedgerError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Errors the caller may retry without changing its request
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            LedgerError::Database(_) | LedgerError::Serialization(_) | LedgerError::Io(_)
        )
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Validation(e) => write!(f, "Validation error: {e}"),
            LedgerError::NotFound { kind, id } => write!(f, "{kind} {id} not found"),
            LedgerError::State(e) => write!(f, "State error: {e}"),
            LedgerError::Integrity(e) => write!(f, "Integrity error: {e}"),
            LedgerError::Database(msg) => write!(f, "Database error: {msg}"),
            LedgerError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            LedgerError::Io(msg) => write!(f, "I/O error: {msg}"),
            LedgerError::Config(msg) => write!(f, "Configuration error: {msg}"),
            LedgerError::Divergence {
                transaction_id,
                reason,
            } => write!(
                f,
                "Legacy table diverged for transaction {transaction_id}: {reason}"
            ),
            LedgerError::Cancelled => write!(f, "Mining cancelled"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        LedgerError::Validation(err)
    }
}

impl From<StateError> for LedgerError {
    fn from(err: StateError) -> Self {
        LedgerError::State(err)
    }
}

impl From<IntegrityError> for LedgerError {
    fn from(err: IntegrityError) -> Self {
        LedgerError::Integrity(err)
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for LedgerError {
    fn from(err: bincode::error::EncodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for LedgerError {
    fn from(err: bincode::error::DecodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}
