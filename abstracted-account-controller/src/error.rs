//! Controller error types

use abstracted_account_api::{Address, BatchCodecError, GrantKey};
use thiserror::Error;

use crate::permission::store::StoreError;

/// Coarse error classification
///
/// Lets callers tell "not authorized" apart from "temporarily unavailable"
/// and from structural violations without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The caller lacks the required role or grant
    Unauthorized,
    /// The grant exists but cannot be used at this height
    Unavailable,
    /// The batch would break a controller invariant
    Invariant,
    /// The request conflicts with existing state
    Conflict,
    /// Persistence or decoding failed
    Storage,
}

/// Errors raised while creating a controller or executing a batch
///
/// Every error is fatal to the enclosing batch.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("{caller} is not authorized to call {action}")]
    AuthorizationDenied { action: &'static str, caller: Address },

    #[error("Grant not found: {0}")]
    GrantNotFound(GrantKey),

    #[error("Named grant not found: {0}")]
    NamedGrantNotFound(String),

    #[error("Grant {key} expired at height {expiry_height} (current height {height})")]
    GrantExpired {
        key: GrantKey,
        expiry_height: u64,
        height: u64,
    },

    #[error("Grant {key} is cooling down for {remaining} more heights")]
    GrantInCooldown { key: GrantKey, remaining: u64 },

    #[error("Name already registered: {0}")]
    NameAlreadyRegistered(String),

    #[error("Domain binding requires a non-empty label")]
    DomainRequired,

    #[error("Domain binding requires a specific caller, not a wildcard")]
    DomainRequiresSpecificCaller,

    #[error("Delegation at operation {index} is never returned to the controller")]
    SelfDelegationInvariantViolated { index: usize },

    #[error("Managed account authority is held by {holder}, not the controller")]
    AuthorityNotReturned { holder: Address },

    #[error("Managed account is already delegated to {holder}")]
    DelegationInProgress { holder: Address },

    #[error("Admin address {0} must differ from the managed address")]
    IdentityConflict(Address),

    #[error("Controller must be created by a recognized deployer")]
    UninitializedCaller,

    #[error("Controller is already initialized")]
    AlreadyInitialized,

    #[error("Controller is not initialized")]
    NotInitialized,

    #[error("Operation {index} failed: {source}")]
    OperationFailed {
        index: usize,
        #[source]
        source: Box<ControllerError>,
    },

    #[error("Permission store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Decode(#[from] BatchCodecError),
}

impl ControllerError {
    /// Wrap an error with the index of the operation that raised it
    pub fn at(self, index: usize) -> Self {
        match self {
            already @ Self::OperationFailed { .. } => already,
            other => Self::OperationFailed {
                index,
                source: Box::new(other),
            },
        }
    }

    /// Innermost error, skipping `OperationFailed` wrappers
    pub fn root(&self) -> &ControllerError {
        match self {
            Self::OperationFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::OperationFailed { source, .. } => source.class(),
            Self::AuthorizationDenied { .. }
            | Self::GrantNotFound(_)
            | Self::NamedGrantNotFound(_)
            | Self::UninitializedCaller => ErrorClass::Unauthorized,
            Self::GrantExpired { .. } | Self::GrantInCooldown { .. } => ErrorClass::Unavailable,
            Self::SelfDelegationInvariantViolated { .. }
            | Self::AuthorityNotReturned { .. }
            | Self::DelegationInProgress { .. }
            | Self::IdentityConflict(_) => ErrorClass::Invariant,
            Self::NameAlreadyRegistered(_)
            | Self::DomainRequired
            | Self::DomainRequiresSpecificCaller
            | Self::AlreadyInitialized
            | Self::NotInitialized => ErrorClass::Conflict,
            Self::Store(StoreError::Conflict { .. }) => ErrorClass::Conflict,
            Self::Store(_) | Self::Decode(_) => ErrorClass::Storage,
        }
    }
}
