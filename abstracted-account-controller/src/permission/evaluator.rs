//! Grant evaluation
//!
//! Decides whether a plugin may receive delegated authority at a given
//! height. Checks run in a fixed order: existence, then expiry, then
//! cooldown.

use abstracted_account_api::{Address, Grant, GrantKey, PluginId};

use super::staging::StagedState;
use super::store::StoreError;
use crate::error::ControllerError;

/// Outcome of evaluating one grant at one height
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantStatus {
    /// Usable now
    Active,
    /// No grant under this key
    NotFound,
    /// Height is past the grant's expiry
    Expired { expiry_height: u64 },
    /// Used too recently
    Cooldown { remaining: u64 },
}

impl GrantStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Error describing why `key` cannot be used; `None` when active
    pub fn to_error(self, key: GrantKey, height: u64) -> Option<ControllerError> {
        match self {
            Self::Active => None,
            Self::NotFound => Some(ControllerError::GrantNotFound(key)),
            Self::Expired { expiry_height } => Some(ControllerError::GrantExpired {
                key,
                expiry_height,
                height,
            }),
            Self::Cooldown { remaining } => {
                Some(ControllerError::GrantInCooldown { key, remaining })
            }
        }
    }
}

/// Evaluate a grant at `height`
pub fn evaluate(grant: Option<&Grant>, height: u64) -> GrantStatus {
    let Some(grant) = grant else {
        return GrantStatus::NotFound;
    };
    if grant.is_expired(height) {
        return GrantStatus::Expired {
            expiry_height: grant.terms.expiry_height,
        };
    }
    match grant.cooldown_remaining(height) {
        0 => GrantStatus::Active,
        remaining => GrantStatus::Cooldown { remaining },
    }
}

/// Whether the grant under `key` is usable at `height`
pub fn is_grant_active(
    state: &StagedState<'_>,
    key: &GrantKey,
    height: u64,
) -> Result<bool, StoreError> {
    Ok(evaluate(state.grant(key)?.as_ref(), height).is_active())
}

/// Grant selected for a delegation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub key: GrantKey,
    pub grant: Grant,
}

/// Pick the grant that authorizes `caller` to delegate to `plugin`
///
/// The wildcard grant is tried first, then the caller-specific one; the
/// first active match wins. When neither is active the error describes the
/// caller-specific grant if one exists, else the wildcard grant.
pub fn resolve_delegation(
    state: &StagedState<'_>,
    plugin: PluginId,
    caller: &Address,
    height: u64,
) -> Result<Resolution, ControllerError> {
    let wildcard_key = GrantKey::wildcard(plugin);
    let wildcard = state.grant(&wildcard_key)?;
    let wildcard_status = evaluate(wildcard.as_ref(), height);
    if let (GrantStatus::Active, Some(grant)) = (wildcard_status, wildcard) {
        tracing::debug!(grant = %wildcard_key, height, "Wildcard grant matched");
        return Ok(Resolution {
            key: wildcard_key,
            grant,
        });
    }

    let specific_key = GrantKey::specific(plugin, *caller);
    let specific = state.grant(&specific_key)?;
    let specific_status = evaluate(specific.as_ref(), height);
    if let (GrantStatus::Active, Some(grant)) = (specific_status, specific) {
        tracing::debug!(grant = %specific_key, height, "Caller grant matched");
        return Ok(Resolution {
            key: specific_key,
            grant,
        });
    }

    tracing::debug!(
        plugin = %plugin,
        caller = %caller,
        wildcard = ?wildcard_status,
        specific = ?specific_status,
        "No active grant"
    );
    let error = match specific_status {
        GrantStatus::NotFound => wildcard_status.to_error(wildcard_key, height),
        status => status.to_error(specific_key, height),
    };
    Err(error.unwrap_or(ControllerError::GrantNotFound(specific_key)))
}
