//! Controller facade
//!
//! Owns the permission store and audit sink, and runs batches through the
//! two-phase protocol:
//!
//! 1. [`verify_reversals`] checks the whole batch for a reversal after every
//!    delegation, before anything is applied.
//! 2. Operations are applied in order on a [`StagedState`]. The managed
//!    account must be back under controller authority at the end.
//!
//! Only then is the resulting [`ChangeSet`] committed, in one store write.
//! Batches on one handle are serialized by an internal lock. Handles that
//! share a store are serialized by the store's generation check: a batch
//! staged against state another handle has since changed is staged again
//! from the fresh state.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use abstracted_account_api::{
    Address, Batch, ControllerCall, Grant, GrantKey, Operation,
};

use crate::audit::{self, AuditDetails, AuditEvent, AuditEventType, AuditSink};
use crate::delegation::{self, CallContext};
use crate::error::ControllerError;
use crate::permission::evaluator::{self, GrantStatus};
use crate::permission::policy;
use crate::permission::staging::StagedState;
use crate::permission::store::{ChangeSet, Globals, ManagedAccount, PermissionStore, StoreError};
use crate::presets::ControllerConfig;
use crate::registration;
use crate::verifier::verify_reversals;

/// Stage-and-commit rounds before a contended batch gives up
const MAX_COMMIT_ATTEMPTS: u32 = 8;

/// Who is asking to create a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOrigin {
    /// A bare externally-owned signer
    Signer(Address),
    /// A factory contract
    Factory(Address),
}

impl DeployOrigin {
    pub fn address(&self) -> Address {
        match self {
            Self::Signer(address) | Self::Factory(address) => *address,
        }
    }
}

/// Which deploy origins are recognized
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeployerPolicy {
    /// Any factory; bare signers are always refused
    #[default]
    AnyFactory,
    /// Only the listed factories
    Allowlist(BTreeSet<Address>),
}

impl DeployerPolicy {
    pub fn allowlist(factories: impl IntoIterator<Item = Address>) -> Self {
        Self::Allowlist(factories.into_iter().collect())
    }

    pub fn recognizes(&self, origin: &DeployOrigin) -> bool {
        match (self, origin) {
            (_, DeployOrigin::Signer(_)) => false,
            (Self::AnyFactory, DeployOrigin::Factory(_)) => true,
            (Self::Allowlist(factories), DeployOrigin::Factory(factory)) => {
                factories.contains(factory)
            }
        }
    }
}

/// Initial principals of a new controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateParams {
    /// The controller's own address
    pub controller: Address,
    pub admin: Address,
    pub managed: Address,
    pub revocation_authority: Address,
    pub version: String,
}

impl CreateParams {
    pub fn new(
        controller: Address,
        admin: Address,
        managed: Address,
        revocation_authority: Address,
    ) -> Self {
        Self {
            controller,
            admin,
            managed,
            revocation_authority,
            version: String::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// Result of a successful (or simulated) batch
#[derive(Debug, Clone)]
pub struct BatchReceipt {
    pub height: u64,
    /// Number of operations in the batch
    pub operations: usize,
    /// Effects written to the store
    pub changes: ChangeSet,
    /// Audit events produced, in order
    pub events: Vec<AuditEvent>,
}

/// Authorization and delegation engine for one managed account
pub struct Controller {
    store: Arc<dyn PermissionStore>,
    audit: Arc<dyn AuditSink>,
    address: Address,
    lock: Mutex<()>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Initialize a new controller in `config.store`
    ///
    /// The managed account starts rekeyed to the controller.
    pub fn create(
        config: ControllerConfig,
        origin: DeployOrigin,
        params: CreateParams,
    ) -> Result<Self, ControllerError> {
        if !config.deployers.recognizes(&origin) {
            tracing::warn!(origin = ?origin, "Unrecognized deployer");
            return Err(ControllerError::UninitializedCaller);
        }
        if params.admin == params.managed {
            return Err(ControllerError::IdentityConflict(params.admin));
        }
        let generation = config.store.generation()?;
        if config.store.globals()?.is_some() {
            return Err(ControllerError::AlreadyInitialized);
        }

        let mut managed = ManagedAccount {
            address: params.managed,
            auth_address: None,
        };
        managed.rekey(params.controller);

        let globals = Globals {
            controller: params.controller,
            admin: params.admin,
            managed,
            revocation_authority: params.revocation_authority,
            version: params.version,
        };
        let initialized = config.store.commit(ChangeSet {
            globals: Some(globals),
            base_generation: Some(generation),
            ..ChangeSet::default()
        });
        if let Err(err) = initialized {
            return Err(match err {
                StoreError::Conflict { .. } if config.store.globals()?.is_some() => {
                    ControllerError::AlreadyInitialized
                }
                other => other.into(),
            });
        }

        tracing::info!(
            controller = %params.controller,
            managed = %params.managed,
            "Controller created"
        );

        let controller = Self {
            store: config.store,
            audit: config.audit,
            address: params.controller,
            lock: Mutex::new(()),
        };
        controller.emit(vec![AuditEvent::new(
            AuditEventType::ControllerCreated,
            origin.address(),
            0,
            AuditDetails::Created {
                controller: params.controller,
                admin: params.admin,
                managed: params.managed,
                revocation_authority: params.revocation_authority,
            },
        )]);
        Ok(controller)
    }

    /// Attach to a controller already initialized in `config.store`
    pub fn open(config: ControllerConfig) -> Result<Self, ControllerError> {
        let globals = config
            .store
            .globals()?
            .ok_or(ControllerError::NotInitialized)?;

        Ok(Self {
            store: config.store,
            audit: config.audit,
            address: globals.controller,
            lock: Mutex::new(()),
        })
    }

    /// The controller's own address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Run `batch` at `height` and commit its effects
    ///
    /// Either every operation takes effect or none does.
    #[tracing::instrument(skip(self, batch), fields(controller = %self.address, operations = batch.len()))]
    pub fn execute(&self, batch: &Batch, height: u64) -> Result<BatchReceipt, ControllerError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::LockPoisoned)?;

        match self.stage_and_commit(batch, height) {
            Ok((changes, mut events)) => {
                let sender = batch_sender(batch).unwrap_or(self.address);
                events.push(audit::batch_outcome(sender, height, batch.len(), None));
                tracing::info!(events = events.len(), "Batch committed");
                self.emit(events.clone());
                Ok(BatchReceipt {
                    height,
                    operations: batch.len(),
                    changes,
                    events,
                })
            }
            Err(err) => {
                tracing::warn!(error = %err, "Batch rejected");
                let sender = batch_sender(batch).unwrap_or(self.address);
                self.emit(vec![audit::batch_outcome(
                    sender,
                    height,
                    batch.len(),
                    Some(err.to_string()),
                )]);
                Err(err)
            }
        }
    }

    /// Decode a MessagePack batch and run it
    pub fn execute_encoded(&self, bytes: &[u8], height: u64) -> Result<BatchReceipt, ControllerError> {
        let batch = Batch::decode(bytes)?;
        self.execute(&batch, height)
    }

    /// Run `batch` without committing anything
    pub fn simulate(&self, batch: &Batch, height: u64) -> Result<BatchReceipt, ControllerError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        let (changes, events) = self.stage(batch, height)?;
        Ok(BatchReceipt {
            height,
            operations: batch.len(),
            changes,
            events,
        })
    }

    fn stage_and_commit(
        &self,
        batch: &Batch,
        height: u64,
    ) -> Result<(ChangeSet, Vec<AuditEvent>), ControllerError> {
        let mut attempt = 1;
        loop {
            let (changes, events) = self.stage(batch, height)?;
            match self.store.commit(changes.clone()) {
                Ok(()) => return Ok((changes, events)),
                Err(StoreError::Conflict { expected, found }) if attempt < MAX_COMMIT_ATTEMPTS => {
                    tracing::debug!(attempt, expected, found, "Store changed while staging, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn stage(
        &self,
        batch: &Batch,
        height: u64,
    ) -> Result<(ChangeSet, Vec<AuditEvent>), ControllerError> {
        let mut state = StagedState::begin(self.store.as_ref())?;

        let managed = state.globals().managed.address;
        verify_reversals(batch, &self.address, &managed)?;

        for (index, operation) in batch.operations().iter().enumerate() {
            self.apply(&mut state, operation, height)
                .map_err(|err| err.at(index))?;
        }

        let globals = state.globals();
        if !globals.is_self_controlled() {
            return Err(ControllerError::AuthorityNotReturned {
                holder: globals.managed.authority(),
            });
        }
        Ok(state.finish())
    }

    fn apply(
        &self,
        state: &mut StagedState<'_>,
        operation: &Operation,
        height: u64,
    ) -> Result<(), ControllerError> {
        match operation {
            Operation::Invoke {
                sender,
                controller,
                call,
            } if *controller == self.address => {
                tracing::debug!(method = call.method_name(), sender = %sender, "Applying call");
                dispatch(state, &CallContext::new(*sender, height), call)
            }
            Operation::Rekey {
                sender,
                account,
                to,
            } if *account == state.globals().managed.address => {
                rekey(state, &CallContext::new(*sender, height), *to)
            }
            _ => Ok(()),
        }
    }

    fn emit(&self, events: Vec<AuditEvent>) {
        for event in events {
            if let Err(err) = self.audit.record(event) {
                tracing::warn!(error = %err, "Failed to record audit event");
            }
        }
        if let Err(err) = self.audit.flush() {
            tracing::warn!(error = %err, "Failed to flush audit sink");
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn globals(&self) -> Result<Globals, ControllerError> {
        Ok(StagedState::begin(self.store.as_ref())?.globals().clone())
    }

    /// Whether `caller` is the admin or bound to the co-admin domain
    pub fn is_admin(&self, caller: &Address) -> Result<bool, ControllerError> {
        let state = StagedState::begin(self.store.as_ref())?;
        Ok(policy::is_admin(&state, caller)?)
    }

    pub fn can_revoke(&self, caller: &Address) -> Result<bool, ControllerError> {
        let state = StagedState::begin(self.store.as_ref())?;
        Ok(policy::can_revoke(&state, caller))
    }

    pub fn grant(&self, key: &GrantKey) -> Result<Option<Grant>, ControllerError> {
        Ok(self.store.grant(key)?)
    }

    pub fn named_grant(&self, name: &str) -> Result<Option<GrantKey>, ControllerError> {
        Ok(self.store.named(name)?)
    }

    pub fn domain(&self, address: &Address) -> Result<Option<String>, ControllerError> {
        Ok(self.store.domain(address)?)
    }

    pub fn grant_status(&self, key: &GrantKey, height: u64) -> Result<GrantStatus, ControllerError> {
        Ok(evaluator::evaluate(self.store.grant(key)?.as_ref(), height))
    }

    /// Whether the grant at `key` could be used at `height`
    pub fn is_grant_active(&self, key: &GrantKey, height: u64) -> Result<bool, ControllerError> {
        let state = StagedState::begin(self.store.as_ref())?;
        Ok(evaluator::is_grant_active(&state, key, height)?)
    }
}

fn batch_sender(batch: &Batch) -> Option<Address> {
    batch.operations().first().map(Operation::sender)
}

fn dispatch(
    state: &mut StagedState<'_>,
    ctx: &CallContext,
    call: &ControllerCall,
) -> Result<(), ControllerError> {
    match call {
        ControllerCall::UpdateVersion { version } => {
            delegation::update_version(state, ctx, version)
        }
        ControllerCall::ChangeRevocationAuthority { authority } => {
            delegation::change_revocation_authority(state, ctx, *authority)
        }
        ControllerCall::ChangeAdmin { new_admin } => delegation::change_admin(state, ctx, *new_admin),
        ControllerCall::ChangeAdminViaPlugin {
            plugin,
            allowed_caller,
            new_admin,
        } => delegation::change_admin_via_plugin(state, ctx, *plugin, *allowed_caller, *new_admin),
        ControllerCall::VerifyAuthority => delegation::verify_authority(state, ctx),
        ControllerCall::DelegateToAddress { target } => {
            delegation::delegate_to_address(state, ctx, *target)
        }
        ControllerCall::DelegateToPlugin { plugin } => {
            delegation::delegate_to_plugin(state, ctx, *plugin)
        }
        ControllerCall::DelegateToNamedPlugin { name } => {
            delegation::delegate_to_named_plugin(state, ctx, name)
        }
        ControllerCall::AddPlugin { key, terms, domain } => {
            registration::add_plugin(state, ctx, *key, *terms, domain.as_deref())
        }
        ControllerCall::RemovePlugin { key } => registration::remove_plugin(state, ctx, *key),
        ControllerCall::AddNamedPlugin { name, key, terms } => {
            registration::add_named_plugin(state, ctx, name, *key, *terms)
        }
        ControllerCall::RemoveNamedPlugin { name } => {
            registration::remove_named_plugin(state, ctx, name)
        }
    }
}

/// Ledger rekey of the managed account
///
/// Only the current authority can sign it, and never the controller itself:
/// the controller hands authority out through delegation calls only.
fn rekey(state: &mut StagedState<'_>, ctx: &CallContext, to: Address) -> Result<(), ControllerError> {
    let mut globals = state.globals().clone();
    if ctx.sender != globals.managed.authority() || ctx.sender == globals.controller {
        return Err(ControllerError::AuthorizationDenied {
            action: "rekey",
            caller: ctx.sender,
        });
    }

    globals.managed.rekey(to);
    let returned = to == globals.controller;
    state.replace_globals(globals);

    if returned {
        state.record(AuditEvent::new(
            AuditEventType::AuthorityReturned,
            ctx.sender,
            ctx.height,
            AuditDetails::Authority { holder: to },
        ));
    } else {
        state.record(audit::delegated(ctx.sender, ctx.height, to, None));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::permission::store::MemoryPermissionStore;
    use abstracted_account_api::{GrantTerms, PluginId};

    fn factory() -> DeployOrigin {
        DeployOrigin::Factory(Address::from_seed("factory"))
    }

    fn params() -> CreateParams {
        CreateParams::new(
            Address::from_seed("controller"),
            Address::from_seed("admin"),
            Address::from_seed("managed"),
            Address::from_seed("revoker"),
        )
    }

    fn config(audit: Arc<MemoryAuditSink>) -> ControllerConfig {
        ControllerConfig::builder()
            .store(MemoryPermissionStore::new())
            .shared_audit(audit)
            .build()
            .unwrap()
    }

    #[test]
    fn test_deployer_policy() {
        let factory_address = Address::from_seed("factory");
        let allowlist = DeployerPolicy::allowlist([factory_address]);

        assert!(!DeployerPolicy::AnyFactory.recognizes(&DeployOrigin::Signer(factory_address)));
        assert!(DeployerPolicy::AnyFactory.recognizes(&factory()));
        assert!(allowlist.recognizes(&factory()));
        assert!(!allowlist.recognizes(&DeployOrigin::Factory(Address::from_seed("rogue"))));
    }

    #[test]
    fn test_create_rejects_signer() {
        let audit = Arc::new(MemoryAuditSink::new());
        let result = Controller::create(
            config(audit),
            DeployOrigin::Signer(Address::from_seed("someone")),
            params(),
        );
        assert!(matches!(result, Err(ControllerError::UninitializedCaller)));
    }

    #[test]
    fn test_create_rejects_admin_as_managed() {
        let audit = Arc::new(MemoryAuditSink::new());
        let mut params = params();
        params.admin = params.managed;

        let result = Controller::create(config(audit), factory(), params);
        assert!(matches!(result, Err(ControllerError::IdentityConflict(_))));
    }

    #[test]
    fn test_create_twice() {
        let store: Arc<dyn PermissionStore> = Arc::new(MemoryPermissionStore::new());
        let config = ControllerConfig::builder()
            .shared_store(store)
            .audit(MemoryAuditSink::new())
            .build()
            .unwrap();

        Controller::create(config.clone(), factory(), params()).unwrap();
        assert!(matches!(
            Controller::create(config, factory(), params()),
            Err(ControllerError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_open_requires_initialized_store() {
        let audit = Arc::new(MemoryAuditSink::new());
        assert!(matches!(
            Controller::open(config(audit)),
            Err(ControllerError::NotInitialized)
        ));
    }

    #[test]
    fn test_created_self_controlled() {
        let audit = Arc::new(MemoryAuditSink::new());
        let controller = Controller::create(config(audit.clone()), factory(), params()).unwrap();

        let globals = controller.globals().unwrap();
        assert!(globals.is_self_controlled());
        assert_eq!(audit.find_by_type(AuditEventType::ControllerCreated).len(), 1);
    }

    #[test]
    fn test_simulate_leaves_store_untouched() {
        let audit = Arc::new(MemoryAuditSink::new());
        let controller = Controller::create(config(audit.clone()), factory(), params()).unwrap();
        let key = GrantKey::wildcard(PluginId(1));
        let batch = Batch::new().invoke(
            Address::from_seed("admin"),
            controller.address(),
            ControllerCall::AddPlugin {
                key,
                terms: GrantTerms::new(10),
                domain: None,
            },
        );

        let receipt = controller.simulate(&batch, 1).unwrap();
        assert!(receipt.changes.grants.contains_key(&key));
        assert!(controller.grant(&key).unwrap().is_none());
        assert!(audit.find_by_type(AuditEventType::BatchCommitted).is_empty());
    }

    #[test]
    fn test_rekey_by_controller_refused() {
        let audit = Arc::new(MemoryAuditSink::new());
        let controller = Controller::create(config(audit), factory(), params()).unwrap();
        let batch = Batch::new().rekey(
            controller.address(),
            Address::from_seed("managed"),
            Address::from_seed("thief"),
        );

        let err = controller.execute(&batch, 1).unwrap_err();
        assert!(matches!(
            err.root(),
            ControllerError::AuthorizationDenied { action: "rekey", .. }
        ));
    }
}
