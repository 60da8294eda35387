//! abstracted-account-api: Shared types for abstracted account controllers
//!
//! This crate defines the protocol between a controller and the wallets and
//! plugins that drive it: identities, grant records and the batch of
//! operations submitted for atomic execution. Batches travel as MessagePack.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

mod batch;

pub use batch::{Batch, BatchCodecError, ControllerCall, Operation};

/// API version for compatibility checking
pub const API_VERSION: u32 = 1;

/// Domain label that elevates a bound address to admin-equivalent rights
pub const CO_ADMIN_DOMAIN: &str = "co-admin";

const PLUGIN_ADDRESS_CONTEXT: &str = "abstracted-account plugin address v1";
const SEED_ADDRESS_CONTEXT: &str = "abstracted-account seed address v1";

/// Error returned when parsing identities from their text form
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid address '{0}': expected 64 hex characters")]
    InvalidAddress(String),

    #[error("Invalid plugin id '{0}'")]
    InvalidPluginId(String),

    #[error("Invalid grant key '{0}': expected '<plugin>:<caller>'")]
    InvalidGrantKey(String),
}

// ============================================================================
// Identities
// ============================================================================

/// 32-byte ledger account identity
///
/// Displays and parses as 64 lowercase hex characters. Serialized as a
/// string so it can be used as a map key in JSON documents.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 32]);

impl Address {
    /// Byte length of an address
    pub const LEN: usize = 32;

    /// Wrap raw address bytes
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive a deterministic address from a human-readable seed
    ///
    /// Handy for well-known service accounts and fixtures; two equal seeds
    /// always produce the same address.
    pub fn from_seed(seed: &str) -> Self {
        Self(blake3::derive_key(SEED_ADDRESS_CONTEXT, seed.as_bytes()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| ParseError::InvalidAddress(s.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ParseError::InvalidAddress(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Plugin application identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(pub u64);

impl PluginId {
    /// Account address the plugin acts from
    ///
    /// Derived from the identifier alone, so every controller agrees on
    /// which address a delegation to this plugin hands authority to.
    pub fn address(&self) -> Address {
        Address(blake3::derive_key(
            PLUGIN_ADDRESS_CONTEXT,
            &self.0.to_be_bytes(),
        ))
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PluginId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(PluginId)
            .map_err(|_| ParseError::InvalidPluginId(s.to_string()))
    }
}

/// Which caller a grant admits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CallerScope {
    /// Any caller may trigger the delegation
    Any,
    /// Only this address may trigger the delegation
    Specific(Address),
}

impl CallerScope {
    /// The bound address, if this scope names one
    pub fn address(&self) -> Option<Address> {
        match self {
            Self::Any => None,
            Self::Specific(address) => Some(*address),
        }
    }
}

impl From<Address> for CallerScope {
    fn from(address: Address) -> Self {
        Self::Specific(address)
    }
}

impl fmt::Display for CallerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Specific(address) => write!(f, "{}", address),
        }
    }
}

impl FromStr for CallerScope {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "*" => Ok(Self::Any),
            other => other.parse().map(Self::Specific),
        }
    }
}

impl Serialize for CallerScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CallerScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Composite identity of a grant: `(plugin, allowed caller)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GrantKey {
    pub plugin: PluginId,
    pub caller: CallerScope,
}

impl GrantKey {
    pub fn new(plugin: PluginId, caller: impl Into<CallerScope>) -> Self {
        Self {
            plugin,
            caller: caller.into(),
        }
    }

    /// Key admitting any caller
    pub fn wildcard(plugin: PluginId) -> Self {
        Self {
            plugin,
            caller: CallerScope::Any,
        }
    }

    /// Key admitting a single caller
    pub fn specific(plugin: PluginId, caller: Address) -> Self {
        Self {
            plugin,
            caller: CallerScope::Specific(caller),
        }
    }
}

impl fmt::Display for GrantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plugin, self.caller)
    }
}

impl FromStr for GrantKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (plugin, caller) = s
            .split_once(':')
            .ok_or_else(|| ParseError::InvalidGrantKey(s.to_string()))?;
        Ok(Self {
            plugin: plugin.parse()?,
            caller: caller.parse()?,
        })
    }
}

impl Serialize for GrantKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GrantKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Grants
// ============================================================================

/// Terms an admin attaches to a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantTerms {
    /// Delegation is invalid once the ledger height passes this value
    pub expiry_height: u64,

    /// Minimum height distance between consecutive uses
    #[serde(default)]
    pub cooldown: u64,

    /// Whether the plugin may replace the admin while it holds authority
    #[serde(default)]
    pub admin_privilege: bool,
}

impl GrantTerms {
    /// Terms valid up to `expiry_height`, no cooldown, no admin privilege
    pub fn new(expiry_height: u64) -> Self {
        Self {
            expiry_height,
            cooldown: 0,
            admin_privilege: false,
        }
    }

    /// Set the cooldown
    pub fn cooldown(mut self, cooldown: u64) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Grant admin privilege
    pub fn admin_privilege(mut self) -> Self {
        self.admin_privilege = true;
        self
    }
}

/// Stored grant: terms plus usage tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub terms: GrantTerms,

    /// Height of the last successful delegation; `None` until first use
    #[serde(default)]
    pub last_used_height: Option<u64>,
}

impl Grant {
    /// Create an unused grant
    pub fn new(terms: GrantTerms) -> Self {
        Self {
            terms,
            last_used_height: None,
        }
    }

    /// Whether `height` lies past the expiry height
    pub fn is_expired(&self, height: u64) -> bool {
        height > self.terms.expiry_height
    }

    /// Heights left before the grant may be used again (0 when usable)
    pub fn cooldown_remaining(&self, height: u64) -> u64 {
        match self.last_used_height {
            None => 0,
            Some(last) => self
                .terms
                .cooldown
                .saturating_sub(height.saturating_sub(last)),
        }
    }

    /// Stamp a use at `height`; never moves the stamp backwards
    pub fn record_use(&mut self, height: u64) {
        let stamped = self.last_used_height.map_or(height, |last| last.max(height));
        self.last_used_height = Some(stamped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_text_form() {
        let address = Address::from_seed("alice");
        let text = address.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<Address>().unwrap(), address);

        assert!(matches!(
            "abc".parse::<Address>(),
            Err(ParseError::InvalidAddress(_))
        ));
        assert!(matches!(
            "zz".repeat(32).parse::<Address>(),
            Err(ParseError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_seed_and_plugin_addresses_are_distinct() {
        assert_eq!(Address::from_seed("alice"), Address::from_seed("alice"));
        assert_ne!(Address::from_seed("alice"), Address::from_seed("bob"));
        assert_eq!(PluginId(7).address(), PluginId(7).address());
        assert_ne!(PluginId(7).address(), PluginId(8).address());
    }

    #[test]
    fn test_grant_key_text_form() {
        let wildcard = GrantKey::wildcard(PluginId(42));
        assert_eq!(wildcard.to_string(), "42:*");
        assert_eq!("42:*".parse::<GrantKey>().unwrap(), wildcard);

        let caller = Address::from_seed("carol");
        let specific = GrantKey::specific(PluginId(42), caller);
        assert_eq!(specific.to_string().parse::<GrantKey>().unwrap(), specific);

        assert!(matches!(
            "no-separator".parse::<GrantKey>(),
            Err(ParseError::InvalidGrantKey(_))
        ));
        assert!(matches!(
            "x:*".parse::<GrantKey>(),
            Err(ParseError::InvalidPluginId(_))
        ));
    }

    #[test]
    fn test_grant_key_as_json_map_key() {
        let mut grants = std::collections::BTreeMap::new();
        grants.insert(GrantKey::wildcard(PluginId(1)), Grant::new(GrantTerms::new(10)));

        let json = serde_json::to_string(&grants).unwrap();
        assert!(json.contains("\"1:*\""));

        let decoded: std::collections::BTreeMap<GrantKey, Grant> =
            serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, grants);
    }

    #[test]
    fn test_grant_cooldown() {
        let mut grant = Grant::new(GrantTerms::new(1000).cooldown(5));
        assert_eq!(grant.cooldown_remaining(0), 0);

        grant.record_use(3);
        assert_eq!(grant.cooldown_remaining(4), 4);
        assert_eq!(grant.cooldown_remaining(7), 1);
        assert_eq!(grant.cooldown_remaining(8), 0);
    }

    #[test]
    fn test_grant_expiry_and_monotonic_use() {
        let mut grant = Grant::new(GrantTerms::new(100));
        assert!(!grant.is_expired(100));
        assert!(grant.is_expired(101));

        grant.record_use(50);
        grant.record_use(40);
        assert_eq!(grant.last_used_height, Some(50));
    }
}
