//! Plugin registration
//!
//! Admin-facing operations that create and delete grants. Removal is also
//! open to the revocation authority so a compromised plugin can be cut off
//! without the admin key.

use abstracted_account_api::{Grant, GrantKey, GrantTerms};

use crate::audit::{self, AuditDetails, AuditEvent, AuditEventType};
use crate::delegation::CallContext;
use crate::error::ControllerError;
use crate::permission::policy::{require_admin, require_admin_or_revoker};
use crate::permission::staging::StagedState;

/// Create or overwrite the grant at `key`
///
/// With `domain`, the grant's caller is also bound to that label. Binding to
/// the co-admin label makes the caller an admin.
pub fn add_plugin(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    key: GrantKey,
    terms: GrantTerms,
    domain: Option<&str>,
) -> Result<(), ControllerError> {
    require_admin(state, &ctx.sender, "add_plugin")?;

    // Validate the binding before touching the grant
    let binding = match domain {
        Some(label) => {
            if label.is_empty() {
                return Err(ControllerError::DomainRequired);
            }
            let caller = key
                .caller
                .address()
                .ok_or(ControllerError::DomainRequiresSpecificCaller)?;
            Some((caller, label.to_string()))
        }
        None => None,
    };

    state.put_grant(key, Grant::new(terms));
    state.record(audit::grant_added(ctx.sender, ctx.height, key, terms, None));

    if let Some((address, label)) = binding {
        tracing::info!(address = %address, label = %label, "Binding domain");
        state.bind_domain(address, label.clone());
        state.record(
            AuditEvent::new(
                AuditEventType::DomainBound,
                ctx.sender,
                ctx.height,
                AuditDetails::Domain { address, label },
            )
            .with_grant(key),
        );
    }
    Ok(())
}

/// Delete the grant at `key`, along with any names pointing at it
///
/// Domain bindings are left alone.
pub fn remove_plugin(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    key: GrantKey,
) -> Result<(), ControllerError> {
    require_admin_or_revoker(state, &ctx.sender, "remove_plugin")?;

    if state.grant(&key)?.is_none() {
        return Err(ControllerError::GrantNotFound(key));
    }

    for name in state.names_for(&key)? {
        state.delete_name(name.clone());
        state.record(audit::grant_removed(ctx.sender, ctx.height, key, Some(name)));
    }
    state.delete_grant(key);
    state.record(audit::grant_removed(ctx.sender, ctx.height, key, None));
    Ok(())
}

/// Create a grant under a new, unique name
pub fn add_named_plugin(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    name: &str,
    key: GrantKey,
    terms: GrantTerms,
) -> Result<(), ControllerError> {
    require_admin(state, &ctx.sender, "add_named_plugin")?;

    if state.named(name)?.is_some() {
        return Err(ControllerError::NameAlreadyRegistered(name.to_string()));
    }

    state.put_grant(key, Grant::new(terms));
    state.put_name(name.to_string(), key);
    state.record(audit::grant_added(
        ctx.sender,
        ctx.height,
        key,
        terms,
        Some(name.to_string()),
    ));
    Ok(())
}

/// Delete a name and the grant it points at
pub fn remove_named_plugin(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    name: &str,
) -> Result<(), ControllerError> {
    require_admin_or_revoker(state, &ctx.sender, "remove_named_plugin")?;

    let key = state
        .named(name)?
        .ok_or_else(|| ControllerError::NamedGrantNotFound(name.to_string()))?;

    // Other names sharing the grant would dangle otherwise
    for alias in state.names_for(&key)? {
        state.delete_name(alias);
    }
    state.delete_grant(key);
    state.record(audit::grant_removed(
        ctx.sender,
        ctx.height,
        key,
        Some(name.to_string()),
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::store::{
        ChangeSet, Globals, ManagedAccount, MemoryPermissionStore, PermissionStore,
    };
    use abstracted_account_api::{Address, PluginId, CO_ADMIN_DOMAIN};

    fn admin_ctx() -> CallContext {
        CallContext::new(Address::from_seed("admin"), 1)
    }

    fn store() -> MemoryPermissionStore {
        let store = MemoryPermissionStore::new();
        let controller = Address::from_seed("controller");
        store
            .commit(ChangeSet {
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
            })
            .unwrap();
        store
    }

    #[test]
    fn test_add_plugin_overwrites() {
        let store = store();
        let mut state = StagedState::begin(&store).unwrap();
        let key = GrantKey::wildcard(PluginId(1));

        add_plugin(&mut state, &admin_ctx(), key, GrantTerms::new(10), None).unwrap();
        add_plugin(&mut state, &admin_ctx(), key, GrantTerms::new(20).cooldown(2), None).unwrap();

        let grant = state.grant(&key).unwrap().unwrap();
        assert_eq!(grant.terms.expiry_height, 20);
        assert_eq!(grant.terms.cooldown, 2);
    }

    #[test]
    fn test_domain_binding_rules() {
        let store = store();
        let mut state = StagedState::begin(&store).unwrap();
        let wildcard = GrantKey::wildcard(PluginId(1));
        let specific = GrantKey::specific(PluginId(1), Address::from_seed("passkey"));

        assert!(matches!(
            add_plugin(&mut state, &admin_ctx(), specific, GrantTerms::new(10), Some("")),
            Err(ControllerError::DomainRequired)
        ));
        assert!(matches!(
            add_plugin(&mut state, &admin_ctx(), wildcard, GrantTerms::new(10), Some("payments")),
            Err(ControllerError::DomainRequiresSpecificCaller)
        ));
        assert!(state.grant(&wildcard).unwrap().is_none());

        add_plugin(
            &mut state,
            &admin_ctx(),
            specific,
            GrantTerms::new(10),
            Some(CO_ADMIN_DOMAIN),
        )
        .unwrap();
        assert_eq!(
            state.domain(&Address::from_seed("passkey")).unwrap().as_deref(),
            Some(CO_ADMIN_DOMAIN)
        );
    }

    #[test]
    fn test_revoker_can_remove_but_not_add() {
        let store = store();
        let mut state = StagedState::begin(&store).unwrap();
        let key = GrantKey::wildcard(PluginId(2));
        let revoker = CallContext::new(Address::from_seed("revoker"), 1);

        assert!(add_plugin(&mut state, &revoker, key, GrantTerms::new(10), None).is_err());

        add_plugin(&mut state, &admin_ctx(), key, GrantTerms::new(10), None).unwrap();
        remove_plugin(&mut state, &revoker, key).unwrap();
        assert!(state.grant(&key).unwrap().is_none());
    }

    #[test]
    fn test_remove_missing_grant() {
        let store = store();
        let mut state = StagedState::begin(&store).unwrap();
        let key = GrantKey::wildcard(PluginId(2));

        assert!(matches!(
            remove_plugin(&mut state, &admin_ctx(), key),
            Err(ControllerError::GrantNotFound(k)) if k == key
        ));
    }

    #[test]
    fn test_named_plugin_lifecycle() {
        let store = store();
        let mut state = StagedState::begin(&store).unwrap();
        let key = GrantKey::wildcard(PluginId(5));

        add_named_plugin(&mut state, &admin_ctx(), "x", key, GrantTerms::new(1000)).unwrap();
        assert!(matches!(
            add_named_plugin(&mut state, &admin_ctx(), "x", key, GrantTerms::new(5)),
            Err(ControllerError::NameAlreadyRegistered(name)) if name == "x"
        ));
        assert_eq!(
            state.grant(&key).unwrap().unwrap().terms.expiry_height,
            1000
        );

        remove_named_plugin(&mut state, &admin_ctx(), "x").unwrap();
        assert!(state.named("x").unwrap().is_none());
        assert!(state.grant(&key).unwrap().is_none());
    }

    #[test]
    fn test_remove_plugin_drops_names() {
        let store = store();
        let mut state = StagedState::begin(&store).unwrap();
        let key = GrantKey::wildcard(PluginId(5));

        add_named_plugin(&mut state, &admin_ctx(), "x", key, GrantTerms::new(1000)).unwrap();
        remove_plugin(&mut state, &admin_ctx(), key).unwrap();

        assert!(state.named("x").unwrap().is_none());
    }
}
