//! Admin recovery through a privileged plugin
//!
//! The recovery plugin stores a commitment to a secret (its hash, hashed
//! again) and replaces the admin for anyone who reveals the secret.

use std::sync::Arc;

use abstracted_account_controller::{
    Address, AuditEventType, CallerScope, Controller, ControllerCall, ControllerConfig,
    ControllerError, CreateParams, DeployOrigin, GrantKey, GrantTerms, MemoryAuditSink,
    MemoryPermissionStore, Operation, PluginId,
};
use abstracted_account_sdk::{Plugin, PluginSession, SessionContext};

const RECOVERY_PLUGIN: PluginId = PluginId(77);

fn commitment(secret: &[u8]) -> [u8; 32] {
    *blake3::hash(blake3::hash(secret).as_bytes()).as_bytes()
}

struct Recovery {
    commitment: [u8; 32],
    revealed: Vec<u8>,
    new_admin: Address,
}

impl Plugin for Recovery {
    fn id(&self) -> PluginId {
        RECOVERY_PLUGIN
    }

    fn actions(&self, session: &SessionContext) -> Vec<Operation> {
        if commitment(&self.revealed) != self.commitment {
            return vec![Operation::External {
                sender: session.plugin_address,
                label: "recovery refused".into(),
            }];
        }
        vec![Operation::Invoke {
            sender: session.plugin_address,
            controller: session.controller,
            call: ControllerCall::ChangeAdminViaPlugin {
                plugin: session.plugin,
                allowed_caller: CallerScope::Any,
                new_admin: self.new_admin,
            },
        }]
    }
}

struct Wallet {
    controller: Controller,
    audit: Arc<MemoryAuditSink>,
    admin: Address,
    managed: Address,
}

fn wallet(terms: GrantTerms) -> Wallet {
    let audit = Arc::new(MemoryAuditSink::new());
    let config = ControllerConfig::builder()
        .store(MemoryPermissionStore::new())
        .shared_audit(audit.clone())
        .build()
        .expect("Failed to build config");

    let admin = Address::from_seed("lost-phone");
    let managed = Address::from_seed("savings");
    let controller = Controller::create(
        config,
        DeployOrigin::Factory(Address::from_seed("factory")),
        CreateParams::new(
            Address::from_seed("controller"),
            admin,
            managed,
            Address::from_seed("guardian"),
        ),
    )
    .expect("Failed to create controller");

    let batch = abstracted_account_controller::Batch::new().invoke(
        admin,
        controller.address(),
        ControllerCall::AddPlugin {
            key: GrantKey::wildcard(RECOVERY_PLUGIN),
            terms,
            domain: None,
        },
    );
    controller.execute(&batch, 1).expect("Failed to register recovery");

    Wallet {
        controller,
        audit,
        admin,
        managed,
    }
}

fn recover(wallet: &Wallet, secret: &[u8], height: u64) -> Result<(), ControllerError> {
    let plugin = Recovery {
        commitment: commitment(b"correct horse battery staple"),
        revealed: secret.to_vec(),
        new_admin: Address::from_seed("new-phone"),
    };
    let batch = PluginSession::builder(
        Address::from_seed("anyone"),
        wallet.controller.address(),
        wallet.managed,
    )
    .run(&plugin)
    .into_batch();
    wallet.controller.execute(&batch, height).map(|_| ())
}

#[test]
fn test_recovery_with_secret() {
    let wallet = wallet(GrantTerms::new(10_000).cooldown(100).admin_privilege());

    recover(&wallet, b"correct horse battery staple", 50).unwrap();

    let new_admin = Address::from_seed("new-phone");
    assert_eq!(wallet.controller.globals().unwrap().admin, new_admin);
    assert!(!wallet.controller.is_admin(&wallet.admin).unwrap());
    assert!(wallet.controller.globals().unwrap().is_self_controlled());

    let changes = wallet.audit.find_by_type(AuditEventType::AdminChanged);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].actor, RECOVERY_PLUGIN.address());
    assert_eq!(changes[0].grant, Some(GrantKey::wildcard(RECOVERY_PLUGIN)));
}

#[test]
fn test_recovery_with_wrong_secret() {
    let wallet = wallet(GrantTerms::new(10_000).admin_privilege());

    // The session still commits; the plugin simply does nothing
    recover(&wallet, b"hunter2", 50).unwrap();

    assert_eq!(wallet.controller.globals().unwrap().admin, wallet.admin);
    assert!(wallet
        .audit
        .find_by_type(AuditEventType::AdminChanged)
        .is_empty());
}

#[test]
fn test_recovery_without_privilege() {
    let wallet = wallet(GrantTerms::new(10_000));

    let err = recover(&wallet, b"correct horse battery staple", 50).unwrap_err();
    assert!(matches!(
        err,
        ControllerError::OperationFailed { index: 1, .. }
    ));
    assert_eq!(wallet.controller.globals().unwrap().admin, wallet.admin);
}

#[test]
fn test_recovery_rate_limited() {
    let wallet = wallet(GrantTerms::new(10_000).cooldown(100).admin_privilege());

    recover(&wallet, b"hunter2", 50).unwrap();
    let err = recover(&wallet, b"correct horse battery staple", 60).unwrap_err();
    assert!(matches!(
        err.root(),
        ControllerError::GrantInCooldown { remaining: 90, .. }
    ));

    recover(&wallet, b"correct horse battery staple", 150).unwrap();
    assert_eq!(
        wallet.controller.globals().unwrap().admin,
        Address::from_seed("new-phone")
    );
}

#[test]
fn test_recovery_after_expiry() {
    let wallet = wallet(GrantTerms::new(100).admin_privilege());

    let err = recover(&wallet, b"correct horse battery staple", 101).unwrap_err();
    assert!(matches!(err.root(), ControllerError::GrantExpired { .. }));
    assert_eq!(wallet.controller.globals().unwrap().admin, wallet.admin);
}
