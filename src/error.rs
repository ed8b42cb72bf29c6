//! Registry error signals
//!
//! Explicit failures returned by token/pool mutations. Transient RPC
//! failures during refresh are not errors here; they are logged and
//! reported as "no update".
//!
//! Created: 2026-02-03

use alloy::primitives::Address;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("token {0:?} already exists")]
    AlreadyExists(Address),

    #[error("unknown token {0:?}")]
    UnknownToken(Address),

    #[error("unknown pool {0:?}")]
    UnknownPool(Address),

    #[error("token {0:?} is disabled")]
    TokenDisabled(Address),

    #[error("pool {0:?} is disabled")]
    PoolDisabled(Address),

    #[error("cannot pair token {0:?} with itself")]
    IdenticalTokens(Address),

    #[error("all fee tiers already exist for {0}")]
    PoolExists(String),

    #[error("all fee tiers for {0} were checked recently")]
    Throttled(String),

    #[error("failed to fetch {entity}: {reason}")]
    FetchFailed { entity: String, reason: String },

    #[error("failed to subscribe to {entity}: {reason}")]
    Subscription { entity: String, reason: String },
}

impl RegistryError {
    pub fn fetch(entity: impl Into<String>, err: impl std::fmt::Display) -> Self {
        RegistryError::FetchFailed {
            entity: entity.into(),
            reason: err.to_string(),
        }
    }

    pub fn subscription(entity: impl Into<String>, err: impl std::fmt::Display) -> Self {
        RegistryError::Subscription {
            entity: entity.into(),
            reason: err.to_string(),
        }
    }
}
