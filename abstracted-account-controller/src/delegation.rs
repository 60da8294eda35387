//! Delegation controller
//!
//! Moves signing authority over the managed account between the controller,
//! plugins, and admin-chosen addresses, and manages the controller's own
//! principals (admin, revocation authority, version).
//!
//! # Authority states
//!
//! ```text
//! Self-controlled ──delegate_to_plugin──► Delegated (plugin address)
//!        ▲          delegate_to_named_plugin         │
//!        │                                           │ rekey back
//!        ├───────────────────────────────────────────┘
//!        │
//!        └──delegate_to_address──► Externally held ──rekey back──┘
//! ```
//!
//! Every handler works on a [`StagedState`]; nothing reaches the store
//! unless the whole batch succeeds.

use abstracted_account_api::{Address, CallerScope, GrantKey, PluginId};

use crate::audit::{self, AuditDetails, AuditEvent, AuditEventType};
use crate::error::ControllerError;
use crate::permission::evaluator::resolve_delegation;
use crate::permission::policy::require_admin;
use crate::permission::staging::StagedState;

/// Who is calling, and at which ledger height
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub sender: Address,
    pub height: u64,
}

impl CallContext {
    pub fn new(sender: Address, height: u64) -> Self {
        Self { sender, height }
    }
}

/// Replace the version metadata (admin only)
pub fn update_version(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    version: &str,
) -> Result<(), ControllerError> {
    require_admin(state, &ctx.sender, "update_version")?;

    let mut globals = state.globals().clone();
    globals.version = version.to_string();
    state.replace_globals(globals);
    state.record(AuditEvent::new(
        AuditEventType::VersionUpdated,
        ctx.sender,
        ctx.height,
        AuditDetails::Version {
            version: version.to_string(),
        },
    ));
    Ok(())
}

/// Replace the revocation authority (admin only)
pub fn change_revocation_authority(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    authority: Address,
) -> Result<(), ControllerError> {
    require_admin(state, &ctx.sender, "change_revocation_authority")?;

    let mut globals = state.globals().clone();
    let previous = std::mem::replace(&mut globals.revocation_authority, authority);
    state.replace_globals(globals);
    state.record(AuditEvent::new(
        AuditEventType::RevocationAuthorityChanged,
        ctx.sender,
        ctx.height,
        AuditDetails::Principal {
            previous,
            current: authority,
        },
    ));
    Ok(())
}

/// Replace the admin (admin only)
pub fn change_admin(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    new_admin: Address,
) -> Result<(), ControllerError> {
    require_admin(state, &ctx.sender, "change_admin")?;
    replace_admin(state, ctx, new_admin, None)
}

/// Replace the admin on behalf of a plugin in active control
///
/// The sender must be the plugin's own address, the managed account must
/// currently be delegated to that plugin, and the grant at
/// `(plugin, allowed_caller)` must carry admin privilege. Expiry and
/// cooldown are not re-checked: they were enforced when control was handed
/// over.
pub fn change_admin_via_plugin(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    plugin: PluginId,
    allowed_caller: CallerScope,
    new_admin: Address,
) -> Result<(), ControllerError> {
    let plugin_address = plugin.address();
    let denied = || ControllerError::AuthorizationDenied {
        action: "change_admin_via_plugin",
        caller: ctx.sender,
    };

    if ctx.sender != plugin_address {
        return Err(denied());
    }
    if state.globals().managed.authority() != plugin_address {
        tracing::debug!(plugin = %plugin, "Plugin does not hold delegated control");
        return Err(denied());
    }

    let key = GrantKey::new(plugin, allowed_caller);
    let grant = state
        .grant(&key)?
        .ok_or(ControllerError::GrantNotFound(key))?;
    if !grant.terms.admin_privilege {
        tracing::debug!(grant = %key, "Grant lacks admin privilege");
        return Err(denied());
    }

    replace_admin(state, ctx, new_admin, Some(key))
}

fn replace_admin(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    new_admin: Address,
    via: Option<GrantKey>,
) -> Result<(), ControllerError> {
    let mut globals = state.globals().clone();
    if new_admin == globals.managed.address {
        return Err(ControllerError::IdentityConflict(new_admin));
    }

    let previous = std::mem::replace(&mut globals.admin, new_admin);
    state.replace_globals(globals);

    let event = AuditEvent::new(
        AuditEventType::AdminChanged,
        ctx.sender,
        ctx.height,
        AuditDetails::Principal {
            previous,
            current: new_admin,
        },
    );
    state.record(match via {
        Some(key) => event.with_grant(key),
        None => event,
    });
    Ok(())
}

/// Assert the managed account is back under controller authority
pub fn verify_authority(state: &mut StagedState<'_>, ctx: &CallContext) -> Result<(), ControllerError> {
    let globals = state.globals();
    if !globals.is_self_controlled() {
        return Err(ControllerError::AuthorityNotReturned {
            holder: globals.managed.authority(),
        });
    }

    let holder = globals.controller;
    state.record(AuditEvent::new(
        AuditEventType::AuthorityVerified,
        ctx.sender,
        ctx.height,
        AuditDetails::Authority { holder },
    ));
    Ok(())
}

/// Hand authority to an arbitrary address (admin only)
pub fn delegate_to_address(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    target: Address,
) -> Result<(), ControllerError> {
    require_admin(state, &ctx.sender, "delegate_to_address")?;
    hand_over(state, ctx, target, None)
}

/// Hand authority to `plugin` under the first active matching grant
pub fn delegate_to_plugin(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    plugin: PluginId,
) -> Result<(), ControllerError> {
    require_self_controlled(state)?;

    let resolution = resolve_delegation(state, plugin, &ctx.sender, ctx.height)?;
    let mut grant = resolution.grant;
    grant.record_use(ctx.height);
    state.put_grant(resolution.key, grant);

    hand_over(state, ctx, plugin.address(), Some(resolution.key))
}

/// Hand authority to the plugin registered under `name`
pub fn delegate_to_named_plugin(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    name: &str,
) -> Result<(), ControllerError> {
    let key = state
        .named(name)?
        .ok_or_else(|| ControllerError::NamedGrantNotFound(name.to_string()))?;
    delegate_to_plugin(state, ctx, key.plugin)
}

fn require_self_controlled(state: &StagedState<'_>) -> Result<(), ControllerError> {
    let globals = state.globals();
    if globals.is_self_controlled() {
        Ok(())
    } else {
        Err(ControllerError::DelegationInProgress {
            holder: globals.managed.authority(),
        })
    }
}

fn hand_over(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    holder: Address,
    via: Option<GrantKey>,
) -> Result<(), ControllerError> {
    require_self_controlled(state)?;

    let mut globals = state.globals().clone();
    globals.managed.rekey(holder);
    state.replace_globals(globals);

    tracing::debug!(holder = %holder, height = ctx.height, "Authority delegated");
    state.record(audit::delegated(ctx.sender, ctx.height, holder, via));
    Ok(())
}
