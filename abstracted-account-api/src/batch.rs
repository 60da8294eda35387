//! Batch protocol
//!
//! A batch is an ordered group of operations that a controller applies
//! atomically: either every operation takes effect or none does.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Address, CallerScope, GrantKey, GrantTerms, PluginId};

/// Method invoked on a controller instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerCall {
    /// Replace the version metadata (admin only)
    UpdateVersion { version: String },

    /// Replace the revocation authority (admin only)
    ChangeRevocationAuthority { authority: Address },

    /// Replace the admin (admin only)
    ChangeAdmin { new_admin: Address },

    /// Replace the admin from a plugin currently holding authority
    ChangeAdminViaPlugin {
        plugin: PluginId,
        allowed_caller: CallerScope,
        new_admin: Address,
    },

    /// Assert the managed account is back under controller authority
    VerifyAuthority,

    /// Hand authority to an arbitrary address (admin only)
    DelegateToAddress { target: Address },

    /// Hand authority to a plugin under an active grant
    DelegateToPlugin { plugin: PluginId },

    /// Hand authority to the plugin registered under `name`
    DelegateToNamedPlugin { name: String },

    /// Create or overwrite a grant, optionally binding the caller to a domain
    AddPlugin {
        key: GrantKey,
        terms: GrantTerms,
        #[serde(default)]
        domain: Option<String>,
    },

    /// Delete a grant (admin or revocation authority)
    RemovePlugin { key: GrantKey },

    /// Create a grant under a unique name (admin only)
    AddNamedPlugin {
        name: String,
        key: GrantKey,
        terms: GrantTerms,
    },

    /// Delete a named grant and its name (admin or revocation authority)
    RemoveNamedPlugin { name: String },
}

impl ControllerCall {
    /// Stable method name, used in logs and audit records
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::UpdateVersion { .. } => "update_version",
            Self::ChangeRevocationAuthority { .. } => "change_revocation_authority",
            Self::ChangeAdmin { .. } => "change_admin",
            Self::ChangeAdminViaPlugin { .. } => "change_admin_via_plugin",
            Self::VerifyAuthority => "verify_authority",
            Self::DelegateToAddress { .. } => "delegate_to_address",
            Self::DelegateToPlugin { .. } => "delegate_to_plugin",
            Self::DelegateToNamedPlugin { .. } => "delegate_to_named_plugin",
            Self::AddPlugin { .. } => "add_plugin",
            Self::RemovePlugin { .. } => "remove_plugin",
            Self::AddNamedPlugin { .. } => "add_named_plugin",
            Self::RemoveNamedPlugin { .. } => "remove_named_plugin",
        }
    }

    /// Whether this call moves authority away from the controller
    pub fn delegates_authority(&self) -> bool {
        matches!(
            self,
            Self::DelegateToAddress { .. }
                | Self::DelegateToPlugin { .. }
                | Self::DelegateToNamedPlugin { .. }
        )
    }
}

/// Single step of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Call a controller method
    Invoke {
        sender: Address,
        controller: Address,
        call: ControllerCall,
    },

    /// Ledger transaction from `account` that moves its authority to `to`
    ///
    /// Must be signed by the account's current authority.
    Rekey {
        sender: Address,
        account: Address,
        to: Address,
    },

    /// Side effect performed by a plugin; opaque to the controller
    External { sender: Address, label: String },
}

impl Operation {
    /// Address that signed this operation
    pub fn sender(&self) -> Address {
        match self {
            Self::Invoke { sender, .. } | Self::Rekey { sender, .. } | Self::External { sender, .. } => {
                *sender
            }
        }
    }

    /// Whether this is a `VerifyAuthority` call on `controller`
    pub fn verifies_authority_of(&self, controller: &Address) -> bool {
        matches!(
            self,
            Self::Invoke { controller: target, call: ControllerCall::VerifyAuthority, .. }
                if target == controller
        )
    }

    /// Whether this hands `account`'s authority back to `controller`
    pub fn returns_authority(&self, account: &Address, controller: &Address) -> bool {
        matches!(
            self,
            Self::Rekey { account: rekeyed, to, .. } if rekeyed == account && to == controller
        )
    }
}

/// Error encoding or decoding a batch
#[derive(Debug, Error)]
pub enum BatchCodecError {
    #[error("Failed to encode batch: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode batch: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Ordered group of operations applied atomically
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    operations: Vec<Operation>,
}

impl Batch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation
    pub fn push(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Append a controller call
    pub fn invoke(self, sender: Address, controller: Address, call: ControllerCall) -> Self {
        self.push(Operation::Invoke {
            sender,
            controller,
            call,
        })
    }

    /// Append a rekey of `account` to `to`, signed by `sender`
    pub fn rekey(self, sender: Address, account: Address, to: Address) -> Self {
        self.push(Operation::Rekey {
            sender,
            account,
            to,
        })
    }

    /// Append an opaque plugin side effect
    pub fn external(self, sender: Address, label: impl Into<String>) -> Self {
        self.push(Operation::External {
            sender,
            label: label.into(),
        })
    }

    /// Operations in execution order
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Encode as MessagePack
    pub fn encode(&self) -> Result<Vec<u8>, BatchCodecError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Decode from MessagePack
    pub fn decode(bytes: &[u8]) -> Result<Self, BatchCodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl FromIterator<Operation> for Batch {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self {
            operations: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}
