//! abstracted-account-controller: authorization and delegation engine
//!
//! A controller holds exclusive signing authority over a managed account
//! and lends it to registered plugins under scoped, expiring, rate-limited
//! grants. Authority always comes back before a batch completes.
//!
//! # Example
//!
//! ```rust,ignore
//! use abstracted_account_controller::{
//!     Controller, ControllerPresets, CreateParams, DeployOrigin,
//! };
//!
//! let controller = Controller::create(
//!     ControllerPresets::persistent("wallet")?,
//!     DeployOrigin::Factory(factory),
//!     CreateParams::new(controller_address, admin, managed, revoker),
//! )?;
//!
//! let receipt = controller.execute(&batch, height)?;
//! ```

pub mod audit;
pub mod controller;
pub mod delegation;
pub mod error;
pub mod permission;
pub mod presets;
pub mod registration;
pub mod tracing_support;
pub mod verifier;

pub use audit::{
    AuditDetails, AuditEvent, AuditEventType, AuditSink, CompositeAuditSink, FileAuditSink,
    MemoryAuditSink, NullAuditSink,
};
pub use controller::{BatchReceipt, Controller, CreateParams, DeployOrigin, DeployerPolicy};
pub use delegation::CallContext;
pub use error::{ControllerError, ErrorClass};
pub use permission::{
    FilePermissionStore, GrantStatus, MemoryPermissionStore, PermissionStore,
    ReadOnlyPermissionStore, StoreError,
};
pub use presets::{ControllerConfig, ControllerConfigBuilder, ControllerPresets, PresetError};
pub use abstracted_account_api::{
    Address, Batch, CallerScope, ControllerCall, Grant, GrantKey, GrantTerms, Operation,
    PluginId, CO_ADMIN_DOMAIN,
};
