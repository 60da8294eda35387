//! Staged view of controller state for a batch in flight
//!
//! Reads fall through to the backing store unless the batch already wrote
//! the entry. Writes stay in the overlay until the controller commits the
//! resulting [`ChangeSet`], so a rejected batch leaves no trace.
//!
//! The overlay remembers the store generation it started from. A commit
//! after any other writer got in first is refused by the store.

use abstracted_account_api::{Address, Grant, GrantKey};

use super::store::{ChangeSet, Globals, PermissionStore, StoreError};
use crate::audit::AuditEvent;
use crate::error::ControllerError;

pub struct StagedState<'s> {
    store: &'s dyn PermissionStore,
    generation: u64,
    globals: Globals,
    changes: ChangeSet,
    events: Vec<AuditEvent>,
}

impl<'s> StagedState<'s> {
    /// Start staging on top of an initialized store
    pub fn begin(store: &'s dyn PermissionStore) -> Result<Self, ControllerError> {
        let generation = store.generation()?;
        let globals = store.globals()?.ok_or(ControllerError::NotInitialized)?;
        Ok(Self {
            store,
            generation,
            globals,
            changes: ChangeSet::default(),
            events: Vec::new(),
        })
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    /// Replace the global record as a whole
    pub fn replace_globals(&mut self, next: Globals) {
        self.globals = next.clone();
        self.changes.globals = Some(next);
    }

    pub fn grant(&self, key: &GrantKey) -> Result<Option<Grant>, StoreError> {
        match self.changes.grants.get(key) {
            Some(staged) => Ok(*staged),
            None => self.store.grant(key),
        }
    }

    pub fn put_grant(&mut self, key: GrantKey, grant: Grant) {
        self.changes.grants.insert(key, Some(grant));
    }

    pub fn delete_grant(&mut self, key: GrantKey) {
        self.changes.grants.insert(key, None);
    }

    pub fn named(&self, name: &str) -> Result<Option<GrantKey>, StoreError> {
        match self.changes.names.get(name) {
            Some(staged) => Ok(*staged),
            None => self.store.named(name),
        }
    }

    pub fn put_name(&mut self, name: String, key: GrantKey) {
        self.changes.names.insert(name, Some(key));
    }

    pub fn delete_name(&mut self, name: String) {
        self.changes.names.insert(name, None);
    }

    /// Names currently pointing at `key`
    pub fn names_for(&self, key: &GrantKey) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self
            .store
            .list_named()?
            .into_iter()
            .filter(|(name, _)| !self.changes.names.contains_key(name))
            .filter(|(_, target)| target == key)
            .map(|(name, _)| name)
            .collect();
        names.extend(
            self.changes
                .names
                .iter()
                .filter(|(_, target)| target.as_ref() == Some(key))
                .map(|(name, _)| name.clone()),
        );
        names.sort();
        Ok(names)
    }

    pub fn domain(&self, address: &Address) -> Result<Option<String>, StoreError> {
        match self.changes.domains.get(address) {
            Some(label) => Ok(Some(label.clone())),
            None => self.store.domain(address),
        }
    }

    pub fn bind_domain(&mut self, address: Address, label: String) {
        self.changes.domains.insert(address, label);
    }

    /// Queue an audit event, emitted only if the batch commits
    pub fn record(&mut self, event: AuditEvent) {
        self.events.push(event);
    }

    /// Hand back the staged effects and their audit trail
    pub fn finish(mut self) -> (ChangeSet, Vec<AuditEvent>) {
        self.changes.base_generation = Some(self.generation);
        (self.changes, self.events)
    }
}
