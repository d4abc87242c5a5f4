use crate::types::{Tier, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlusError {
    #[error("ballot from voter {voter_id} has no membership status")]
    UnknownVoter { voter_id: UserId },

    #[error("candidate {user_id} received ballots but has no membership status")]
    UnknownCandidate { user_id: UserId },

    #[error("user {user_id} is vouched for tier {tier} but has no voucher")]
    VouchWithoutVoucher { user_id: UserId, tier: Tier },

    #[error("user {user_id} has voucher {voucher_id} but no vouch tier")]
    VoucherWithoutTier { user_id: UserId, voucher_id: UserId },

    #[error("user {user_id} is vouched for by {voucher_id}, who has no membership status")]
    UnknownVoucher { user_id: UserId, voucher_id: UserId },

    #[error("user {user_id} assigned conflicting {what}: {first} and {second}")]
    ConflictingAssignment {
        user_id: UserId,
        what: &'static str,
        first: u8,
        second: u8,
    },

    #[error("invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("no vouch criteria configured for tier {0}")]
    MissingVouchCriteria(Tier),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cycle commit failed: {0}")]
    Transaction(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used by callers to decide between alerting and
/// retrying the whole cycle from a fresh snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DataIntegrity,
    Configuration,
    Transaction,
    Storage,
}

impl PlusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlusError::UnknownVoter { .. }
            | PlusError::UnknownCandidate { .. }
            | PlusError::VouchWithoutVoucher { .. }
            | PlusError::VoucherWithoutTier { .. }
            | PlusError::UnknownVoucher { .. }
            | PlusError::ConflictingAssignment { .. }
            | PlusError::InvalidRecord(_) => ErrorKind::DataIntegrity,
            PlusError::MissingVouchCriteria(_)
            | PlusError::InvalidConfig(_)
            | PlusError::Yaml(_) => ErrorKind::Configuration,
            PlusError::Transaction(_) => ErrorKind::Transaction,
            PlusError::Storage(_) | PlusError::Io(_) | PlusError::Json(_) => ErrorKind::Storage,
        }
    }

    /// Only a failed commit is worth retrying; everything else needs a human.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transaction
    }
}

pub type Result<T> = std::result::Result<T, PlusError>;
