//! Pre-configured controller setups for common deployments
//!
//! Provides ready-to-use configurations that can be used directly or as
//! starting points for customization.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audit::{AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
use crate::controller::DeployerPolicy;
use crate::permission::store::{
    FilePermissionStore, MemoryPermissionStore, PermissionStore, ReadOnlyPermissionStore,
};

const DEFAULT_APP_NAME: &str = "abstracted-account";
const STORE_FILE: &str = "controller.json";
const AUDIT_FILE: &str = "audit.jsonl";

/// Everything a [`Controller`](crate::Controller) needs besides its batches
#[derive(Clone)]
pub struct ControllerConfig {
    pub store: Arc<dyn PermissionStore>,
    pub audit: Arc<dyn AuditSink>,
    /// Which deploy origins may create a controller
    pub deployers: DeployerPolicy,
}

impl std::fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("deployers", &self.deployers)
            .finish_non_exhaustive()
    }
}

impl ControllerConfig {
    /// Create a configuration from concrete components
    pub fn new(
        store: impl PermissionStore + 'static,
        audit: impl AuditSink + 'static,
        deployers: DeployerPolicy,
    ) -> Self {
        Self {
            store: Arc::new(store),
            audit: Arc::new(audit),
            deployers,
        }
    }

    /// Start a builder
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::new()
    }
}

/// Builder for controller configurations
#[derive(Default)]
pub struct ControllerConfigBuilder {
    store: Option<Arc<dyn PermissionStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    deployers: DeployerPolicy,
    app_name: Option<String>,
}

impl ControllerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name (used for default paths)
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn store(mut self, store: impl PermissionStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Use a store the caller keeps a handle to
    pub fn shared_store(mut self, store: Arc<dyn PermissionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audit(mut self, audit: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(audit));
        self
    }

    /// Use an audit sink the caller keeps a handle to
    pub fn shared_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn deployers(mut self, deployers: DeployerPolicy) -> Self {
        self.deployers = deployers;
        self
    }

    /// Build the configuration
    ///
    /// Without an explicit store, opens the file store in the application's
    /// config directory.
    pub fn build(self) -> Result<ControllerConfig, PresetError> {
        let store: Arc<dyn PermissionStore> = match self.store {
            Some(store) => store,
            None => {
                let app_name = self.app_name.as_deref().unwrap_or(DEFAULT_APP_NAME);
                let store = FilePermissionStore::default_for_app(app_name)
                    .map_err(|e| PresetError::StoreInit(e.to_string()))?;
                Arc::new(store)
            }
        };

        if let DeployerPolicy::Allowlist(factories) = &self.deployers {
            if factories.is_empty() {
                return Err(PresetError::InvalidConfig(
                    "deployer allowlist is empty".into(),
                ));
            }
        }

        Ok(ControllerConfig {
            store,
            audit: self.audit.unwrap_or_else(|| Arc::new(NullAuditSink)),
            deployers: self.deployers,
        })
    }
}

/// Error type for preset initialization
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("Failed to initialize store: {0}")]
    StoreInit(String),

    #[error("Failed to initialize audit: {0}")]
    AuditInit(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// Preset Configurations
// ============================================================================

/// Preset configurations for common deployments
pub struct ControllerPresets;

impl ControllerPresets {
    /// Long-running deployment in the application's config directory
    ///
    /// - File-based state (`controller.json`)
    /// - File-based audit log (`audit.jsonl`)
    /// - Any factory may deploy
    pub fn persistent(app_name: &str) -> Result<ControllerConfig, PresetError> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(app_name);
        Self::persistent_in(config_dir)
    }

    /// Same as [`persistent`](Self::persistent), rooted at `dir`
    pub fn persistent_in(dir: impl AsRef<Path>) -> Result<ControllerConfig, PresetError> {
        let dir = dir.as_ref();

        let store = FilePermissionStore::new(dir.join(STORE_FILE))
            .map_err(|e| PresetError::StoreInit(e.to_string()))?;

        let audit = FileAuditSink::new(dir.join(AUDIT_FILE))
            .map_err(|e| PresetError::AuditInit(e.to_string()))?;

        Ok(ControllerConfig::new(store, audit, DeployerPolicy::AnyFactory))
    }

    /// Read-only view of another deployment's state
    ///
    /// Batches can be simulated, but every commit fails. With no explicit
    /// `state_file`, reads the persistent preset's file for `app_name`.
    pub fn replica(
        app_name: &str,
        state_file: Option<PathBuf>,
    ) -> Result<ControllerConfig, PresetError> {
        let path = state_file
            .unwrap_or_else(|| FilePermissionStore::default_path(app_name));

        let inner = FilePermissionStore::new(&path)
            .map_err(|e| PresetError::StoreInit(e.to_string()))?;

        Ok(ControllerConfig::new(
            ReadOnlyPermissionStore::new(inner),
            NullAuditSink,
            DeployerPolicy::AnyFactory,
        ))
    }

    /// In-memory everything, for tests
    pub fn testing() -> ControllerConfig {
        ControllerConfig::new(
            MemoryPermissionStore::new(),
            MemoryAuditSink::new(),
            DeployerPolicy::AnyFactory,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Controller, CreateParams, DeployOrigin};
    use abstracted_account_api::Address;

    #[test]
    fn test_builder_with_memory_store() {
        let config = ControllerConfig::builder()
            .store(MemoryPermissionStore::new())
            .build()
            .unwrap();

        assert!(config.store.globals().unwrap().is_none());
        assert!(matches!(config.deployers, DeployerPolicy::AnyFactory));
    }

    #[test]
    fn test_empty_allowlist_rejected() {
        let result = ControllerConfig::builder()
            .store(MemoryPermissionStore::new())
            .deployers(DeployerPolicy::allowlist(Vec::<Address>::new()))
            .build();

        assert!(matches!(result, Err(PresetError::InvalidConfig(_))));
    }

    #[test]
    fn test_persistent_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerPresets::persistent_in(dir.path()).unwrap();

        assert!(config.store.globals().unwrap().is_none());
        assert!(config.audit.is_healthy());
    }

    #[test]
    fn test_testing_preset_runs_a_controller() {
        let config = ControllerPresets::testing();
        assert!(config.store.globals().unwrap().is_none());
        assert!(config.audit.is_healthy());

        let admin = Address::from_seed("admin");
        let controller = Controller::create(
            config.clone(),
            DeployOrigin::Factory(Address::from_seed("factory")),
            CreateParams::new(
                Address::from_seed("controller"),
                admin,
                Address::from_seed("managed"),
                Address::from_seed("revoker"),
            ),
        )
        .unwrap();
        let batch = abstracted_account_api::Batch::new().invoke(
            admin,
            controller.address(),
            abstracted_account_api::ControllerCall::UpdateVersion {
                version: "2.0.0".into(),
            },
        );
        controller.execute(&batch, 1).unwrap();

        // Clones share the in-memory store
        let reopened = Controller::open(config).unwrap();
        assert_eq!(reopened.globals().unwrap().version, "2.0.0");
    }

    #[test]
    fn test_replica_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            ControllerPresets::replica("unused", Some(dir.path().join(STORE_FILE))).unwrap();

        let result = config
            .store
            .commit(crate::permission::store::ChangeSet::default());
        assert!(result.is_err());
    }
}
