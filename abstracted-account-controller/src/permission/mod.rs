//! Permission layer of the controller
//!
//! Decides who may configure the controller and which plugins may receive
//! delegated authority, on top of a pluggable persistence backend.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          StagedState                             │
//! │   (batch overlay: reads fall through, writes wait for commit)    │
//! │  ┌─────────────┐  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │   Policy    │  │  Evaluator   │  │          Store           │ │
//! │  │             │  │              │  │                          │ │
//! │  │ - is_admin  │  │ - existence  │  │ - File (JSON)            │ │
//! │  │ - can_revoke│  │ - expiry     │  │ - Memory                 │ │
//! │  │             │  │ - cooldown   │  │ - ReadOnly               │ │
//! │  └─────────────┘  └──────────────┘  └──────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! ## Policy
//!
//! Pure predicates. The admin, and any address bound to the co-admin
//! domain, may configure the controller. The revocation authority may only
//! remove grants.
//!
//! ## Evaluator
//!
//! A grant is usable at a height when it exists, the height is not past its
//! expiry, and its cooldown has elapsed since the last use. For delegation
//! the wildcard grant is tried before the caller's own.
//!
//! ## Store
//!
//! Persists controller state:
//!
//! - `FilePermissionStore`: JSON file in config directory
//! - `MemoryPermissionStore`: In-memory (session only)
//! - `ReadOnlyPermissionStore`: Wrapper that refuses commits
//!
//! ## Custom Store
//!
//! ```rust,ignore
//! use abstracted_account_controller::permission::{ChangeSet, PermissionStore, StoreError};
//!
//! struct LedgerBackedStore { /* ... */ }
//!
//! impl PermissionStore for LedgerBackedStore {
//!     // reads...
//!     fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
//!         // in one transaction: compare `changes.base_generation` with the
//!         // stored generation, write every entry, bump the generation
//!     }
//! }
//! ```

pub mod evaluator;
pub mod policy;
pub mod staging;
pub mod store;

// Re-exports for convenience
pub use evaluator::{evaluate, is_grant_active, resolve_delegation, GrantStatus, Resolution};
pub use policy::{can_revoke, is_admin};
pub use staging::StagedState;
pub use store::{ChangeSet, Globals, ManagedAccount, PermissionStore, StoreError};
pub use store::{FilePermissionStore, MemoryPermissionStore, ReadOnlyPermissionStore};
