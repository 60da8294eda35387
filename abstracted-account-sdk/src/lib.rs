//! abstracted-account-sdk: helpers for plugins acting through a controller
//!
//! A plugin receives the managed account's authority for the length of one
//! batch. [`PluginSession`] builds that batch so it always ends by handing
//! authority back: a rekey of the managed account to the controller
//! followed by a `VerifyAuthority` call.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use abstracted_account_sdk::prelude::*;
//!
//! struct Payroll;
//!
//! impl Plugin for Payroll {
//!     fn id(&self) -> PluginId {
//!         PluginId(42)
//!     }
//!
//!     fn actions(&self, session: &SessionContext) -> Vec<Operation> {
//!         vec![Operation::External {
//!             sender: session.plugin_address,
//!             label: "pay salaries".into(),
//!         }]
//!     }
//! }
//!
//! let batch = PluginSession::builder(caller, controller, managed)
//!     .run(&Payroll)
//!     .into_batch();
//! ```

// Re-export everything from abstracted-account-api
pub use abstracted_account_api::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{Plugin, PluginSession, PluginSessionBuilder, SessionContext};
    pub use abstracted_account_api::{
        Address, Batch, CallerScope, ControllerCall, Operation, PluginId, API_VERSION,
    };
}

/// Addresses involved in one delegated session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    /// Address requesting the delegation
    pub caller: Address,
    pub controller: Address,
    pub managed: Address,
    pub plugin: PluginId,
    /// Address that holds authority during the session
    pub plugin_address: Address,
}

/// Trait that plugins implement
pub trait Plugin {
    /// Application identifier the plugin is registered under
    fn id(&self) -> PluginId;

    /// Operations to perform while holding the managed account's authority
    fn actions(&self, session: &SessionContext) -> Vec<Operation>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Plugin(PluginId),
    Named { name: String, plugin: PluginId },
}

impl Entry {
    fn plugin(&self) -> PluginId {
        match self {
            Self::Plugin(plugin) | Self::Named { plugin, .. } => *plugin,
        }
    }
}

/// Session addresses before a plugin is chosen
///
/// Nothing can be queued until [`plugin`](Self::plugin),
/// [`named`](Self::named) or [`run`](Self::run) picks the plugin that will
/// sign the session's actions.
#[derive(Debug, Clone, Copy)]
pub struct PluginSessionBuilder {
    caller: Address,
    controller: Address,
    managed: Address,
}

impl PluginSessionBuilder {
    /// Delegate to `plugin` directly
    pub fn plugin(self, plugin: PluginId) -> PluginSession {
        self.enter(Entry::Plugin(plugin))
    }

    /// Delegate through the name `name`, registered for `plugin`
    pub fn named(self, name: impl Into<String>, plugin: PluginId) -> PluginSession {
        self.enter(Entry::Named {
            name: name.into(),
            plugin,
        })
    }

    /// Delegate to `plugin` and queue its actions
    pub fn run(self, plugin: &impl Plugin) -> PluginSession {
        self.plugin(plugin.id()).run(plugin)
    }

    fn enter(self, entry: Entry) -> PluginSession {
        PluginSession {
            caller: self.caller,
            controller: self.controller,
            managed: self.managed,
            entry,
            actions: Vec::new(),
        }
    }
}

/// A delegated plugin session
#[derive(Debug, Clone)]
pub struct PluginSession {
    caller: Address,
    controller: Address,
    managed: Address,
    entry: Entry,
    actions: Vec<Operation>,
}

impl PluginSession {
    /// Start a session requested by `caller`
    pub fn builder(caller: Address, controller: Address, managed: Address) -> PluginSessionBuilder {
        PluginSessionBuilder {
            caller,
            controller,
            managed,
        }
    }

    /// Context handed to plugins
    pub fn context(&self) -> SessionContext {
        let plugin = self.entry.plugin();
        SessionContext {
            caller: self.caller,
            controller: self.controller,
            managed: self.managed,
            plugin,
            plugin_address: plugin.address(),
        }
    }

    /// Queue the actions of `plugin`, signed by the session's plugin
    pub fn run(mut self, plugin: &impl Plugin) -> Self {
        let context = self.context();
        self.actions.extend(plugin.actions(&context));
        self
    }

    /// Queue an opaque side effect signed by the plugin
    pub fn external(mut self, label: impl Into<String>) -> Self {
        self.actions.push(Operation::External {
            sender: self.context().plugin_address,
            label: label.into(),
        });
        self
    }

    /// Queue a controller call signed by the plugin
    pub fn call(mut self, call: ControllerCall) -> Self {
        self.actions.push(Operation::Invoke {
            sender: self.context().plugin_address,
            controller: self.controller,
            call,
        });
        self
    }

    /// Queue an admin replacement under the grant at `(plugin, allowed_caller)`
    pub fn change_admin(self, allowed_caller: CallerScope, new_admin: Address) -> Self {
        let plugin = self.entry.plugin();
        self.call(ControllerCall::ChangeAdminViaPlugin {
            plugin,
            allowed_caller,
            new_admin,
        })
    }

    /// Number of operations queued so far
    pub fn queued(&self) -> usize {
        self.actions.len()
    }

    /// Assemble the batch: delegation, queued actions, then the reversal
    pub fn into_batch(self) -> Batch {
        let context = self.context();
        let delegate = match self.entry {
            Entry::Named { name, .. } => ControllerCall::DelegateToNamedPlugin { name },
            Entry::Plugin(plugin) => ControllerCall::DelegateToPlugin { plugin },
        };

        let batch = Batch::new().invoke(self.caller, self.controller, delegate);
        let batch = self.actions.into_iter().fold(batch, Batch::push);
        batch
            .rekey(context.plugin_address, self.managed, self.controller)
            .invoke(self.caller, self.controller, ControllerCall::VerifyAuthority)
    }

    /// Assemble and MessagePack-encode the batch
    pub fn encode(self) -> Result<Vec<u8>, BatchCodecError> {
        self.into_batch().encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Plugin for Echo {
        fn id(&self) -> PluginId {
            PluginId(11)
        }

        fn actions(&self, session: &SessionContext) -> Vec<Operation> {
            vec![Operation::External {
                sender: session.plugin_address,
                label: format!("echo for {}", session.caller),
            }]
        }
    }

    fn session() -> PluginSessionBuilder {
        PluginSession::builder(
            Address::from_seed("caller"),
            Address::from_seed("controller"),
            Address::from_seed("managed"),
        )
    }

    #[test]
    fn test_session_closes_with_reversal() {
        let batch = session().run(&Echo).into_batch();
        let ops = batch.operations();
        let controller = Address::from_seed("controller");
        let managed = Address::from_seed("managed");

        assert_eq!(ops.len(), 4);
        assert!(matches!(
            &ops[0],
            Operation::Invoke { call: ControllerCall::DelegateToPlugin { plugin }, .. }
                if *plugin == PluginId(11)
        ));
        assert_eq!(ops[1].sender(), PluginId(11).address());
        assert!(ops[2].returns_authority(&managed, &controller));
        assert!(ops[3].verifies_authority_of(&controller));
    }

    #[test]
    fn test_named_session() {
        let batch = session().named("echo", PluginId(11)).run(&Echo).into_batch();

        assert!(matches!(
            &batch.operations()[0],
            Operation::Invoke { call: ControllerCall::DelegateToNamedPlugin { name }, .. }
                if name == "echo"
        ));
    }

    #[test]
    fn test_change_admin_signed_by_plugin() {
        let new_admin = Address::from_seed("new-admin");
        let batch = session()
            .plugin(PluginId(3))
            .change_admin(CallerScope::Any, new_admin)
            .into_batch();

        match &batch.operations()[1] {
            Operation::Invoke { sender, call, .. } => {
                assert_eq!(*sender, PluginId(3).address());
                assert_eq!(
                    *call,
                    ControllerCall::ChangeAdminViaPlugin {
                        plugin: PluginId(3),
                        allowed_caller: CallerScope::Any,
                        new_admin,
                    }
                );
            }
            other => panic!("Expected Invoke, got {:?}", other),
        }
    }

    #[test]
    fn test_queued_actions_all_reach_batch() {
        let plugin = PluginId(4);
        let session = session()
            .plugin(plugin)
            .external("first")
            .call(ControllerCall::UpdateVersion {
                version: "2.0.0".into(),
            })
            .run(&Echo)
            .change_admin(CallerScope::Any, Address::from_seed("new-admin"));
        assert_eq!(session.queued(), 4);

        let batch = session.into_batch();
        let ops = batch.operations();
        assert_eq!(ops.len(), 7);

        // Every queued action is signed by the chosen plugin, in order
        assert!(ops[1..5].iter().all(|op| op.sender() == plugin.address()));
        assert!(matches!(&ops[1], Operation::External { label, .. } if label == "first"));
        assert!(matches!(
            &ops[2],
            Operation::Invoke { call: ControllerCall::UpdateVersion { .. }, .. }
        ));
        assert!(matches!(&ops[3], Operation::External { label, .. } if label.starts_with("echo")));
        assert!(matches!(
            &ops[4],
            Operation::Invoke { call: ControllerCall::ChangeAdminViaPlugin { plugin: p, .. }, .. }
                if *p == plugin
        ));
    }

    #[test]
    fn test_run_on_named_session_keeps_name() {
        let session = session().named("echo", PluginId(11)).run(&Echo);
        assert_eq!(session.context().plugin, PluginId(11));
        assert_eq!(session.queued(), 1);
    }

    #[test]
    fn test_encode_decodes() {
        let bytes = session().run(&Echo).encode().unwrap();
        let decoded = Batch::decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 4);
    }
}
