//! Admin policy
//!
//! Pure predicates deciding who may configure the controller. Every
//! admin-only or revocation entry point goes through these checks; a failed
//! check aborts the batch.

use abstracted_account_api::{Address, CO_ADMIN_DOMAIN};

use super::staging::StagedState;
use super::store::StoreError;
use crate::error::ControllerError;

/// Whether `caller` holds admin rights
///
/// True for the admin itself and for any address bound to the reserved
/// co-admin domain.
pub fn is_admin(state: &StagedState<'_>, caller: &Address) -> Result<bool, StoreError> {
    if *caller == state.globals().admin {
        return Ok(true);
    }
    Ok(state.domain(caller)?.as_deref() == Some(CO_ADMIN_DOMAIN))
}

/// Whether `caller` is the revocation authority
pub fn can_revoke(state: &StagedState<'_>, caller: &Address) -> bool {
    *caller == state.globals().revocation_authority
}

/// Fail unless `caller` holds admin rights
pub fn require_admin(
    state: &StagedState<'_>,
    caller: &Address,
    action: &'static str,
) -> Result<(), ControllerError> {
    if is_admin(state, caller)? {
        Ok(())
    } else {
        Err(ControllerError::AuthorizationDenied {
            action,
            caller: *caller,
        })
    }
}

/// Fail unless `caller` holds admin rights or is the revocation authority
pub fn require_admin_or_revoker(
    state: &StagedState<'_>,
    caller: &Address,
    action: &'static str,
) -> Result<(), ControllerError> {
    if can_revoke(state, caller) || is_admin(state, caller)? {
        Ok(())
    } else {
        Err(ControllerError::AuthorizationDenied {
            action,
            caller: *caller,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::store::{
        ChangeSet, Globals, ManagedAccount, MemoryPermissionStore, PermissionStore,
    };

    fn store_with_binding(label: &str) -> MemoryPermissionStore {
        let store = MemoryPermissionStore::new();
        let controller = Address::from_seed("controller");
        let mut changes = ChangeSet {
            globals: Some(Globals {
                controller,
                admin: Address::from_seed("admin"),
                managed: ManagedAccount {
                    address: Address::from_seed("managed"),
                    auth_address: Some(controller),
                },
                revocation_authority: Address::from_seed("revoker"),
                version: String::new(),
            }),
            ..ChangeSet::default()
        };
        changes
            .domains
            .insert(Address::from_seed("passkey"), label.to_string());
        store.commit(changes).unwrap();
        store
    }

    #[test]
    fn test_admin_and_co_admin() {
        let store = store_with_binding(CO_ADMIN_DOMAIN);
        let state = StagedState::begin(&store).unwrap();

        assert!(is_admin(&state, &Address::from_seed("admin")).unwrap());
        assert!(is_admin(&state, &Address::from_seed("passkey")).unwrap());
        assert!(!is_admin(&state, &Address::from_seed("stranger")).unwrap());
    }

    #[test]
    fn test_other_domains_grant_nothing() {
        let store = store_with_binding("payments");
        let state = StagedState::begin(&store).unwrap();

        assert!(!is_admin(&state, &Address::from_seed("passkey")).unwrap());
    }

    #[test]
    fn test_revoker_is_not_admin() {
        let store = store_with_binding(CO_ADMIN_DOMAIN);
        let state = StagedState::begin(&store).unwrap();
        let revoker = Address::from_seed("revoker");

        assert!(can_revoke(&state, &revoker));
        assert!(require_admin_or_revoker(&state, &revoker, "remove_plugin").is_ok());
        match require_admin(&state, &revoker, "add_plugin") {
            Err(ControllerError::AuthorizationDenied { action, caller }) => {
                assert_eq!(action, "add_plugin");
                assert_eq!(caller, revoker);
            }
            other => panic!("Expected AuthorizationDenied, got {:?}", other),
        }
    }
}
