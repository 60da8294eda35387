//! Audit trail for controller state changes
//!
//! Every committed batch produces one event per effect plus a closing
//! `batch_committed` event; a rejected batch produces a single
//! `batch_rejected` event. Sinks are pluggable through [`AuditSink`].

use abstracted_account_api::{Address, GrantKey, GrantTerms};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;

/// Audit event describing one controller effect
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Wall-clock time the event was produced (RFC 3339)
    pub timestamp: String,
    /// Ledger height the batch executed at
    pub height: u64,
    /// Type of event
    pub event_type: AuditEventType,
    /// Address that signed the triggering operation
    pub actor: Address,
    /// Grant involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant: Option<GrantKey>,
    /// Additional details
    pub details: AuditDetails,
}

impl AuditEvent {
    /// Create a new audit event
    pub fn new(event_type: AuditEventType, actor: Address, height: u64, details: AuditDetails) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            height,
            event_type,
            actor,
            grant: None,
            details,
        }
    }

    /// Attach the grant involved
    pub fn with_grant(mut self, key: GrantKey) -> Self {
        self.grant = Some(key);
        self
    }
}

/// Type of audit event
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ControllerCreated,
    GrantAdded,
    GrantRemoved,
    NamedGrantAdded,
    NamedGrantRemoved,
    DomainBound,
    Delegated,
    AuthorityReturned,
    AuthorityVerified,
    AdminChanged,
    RevocationAuthorityChanged,
    VersionUpdated,
    BatchCommitted,
    BatchRejected,
}

/// Details about the audit event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditDetails {
    /// Controller initialization
    Created {
        controller: Address,
        admin: Address,
        managed: Address,
        revocation_authority: Address,
    },
    /// Grant creation
    Grant {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        terms: GrantTerms,
    },
    /// Grant or name removal
    Removal {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Domain binding
    Domain { address: Address, label: String },
    /// Authority moved to `holder`
    Authority { holder: Address },
    /// Admin or revocation authority replaced
    Principal { previous: Address, current: Address },
    /// Version metadata replaced
    Version { version: String },
    /// Batch outcome
    Batch {
        operations: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Error type for audit operations
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    WriteError(#[from] std::io::Error),

    #[error("Failed to serialize audit event: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Audit sink not available: {0}")]
    Unavailable(String),
}

/// Trait for audit event sinks
pub trait AuditSink: Send + Sync {
    /// Record an audit event
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Flush any buffered events
    fn flush(&self) -> Result<(), AuditError>;

    /// Check if the sink is healthy/available
    fn is_healthy(&self) -> bool {
        true
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// File-based audit sink (JSONL format)
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileAuditSink {
    /// Open (or create) an append-only audit log
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Get the log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BufWriter<File>>, AuditError> {
        self.writer
            .lock()
            .map_err(|_| AuditError::Unavailable("audit writer lock poisoned".into()))
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let line = serde_json::to_string(&event)?;
        let mut writer = self.lock()?;
        writeln!(writer, "{}", line)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        self.lock()?.flush()?;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.path.parent().map(|p| p.exists()).unwrap_or(true)
    }
}

impl fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

/// In-memory audit sink with a bounded FIFO buffer
pub struct MemoryAuditSink {
    events: RwLock<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl MemoryAuditSink {
    /// Create a new memory sink holding up to 1000 events
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create a new memory sink holding up to `max_events` events
    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(max_events.min(1000))),
            max_events,
        }
    }

    /// Snapshot of all retained events, oldest first
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .read()
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.events.read().map(|events| events.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.write() {
            events.clear();
        }
    }

    /// Retained events of one type
    pub fn find_by_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Retained events touching one grant
    pub fn find_by_grant(&self, key: &GrantKey) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.grant.as_ref() == Some(key))
            .collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self
            .events
            .write()
            .map_err(|_| AuditError::Unavailable("audit buffer lock poisoned".into()))?;
        if self.max_events == 0 {
            return Ok(());
        }
        while events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("count", &self.count())
            .field("max_events", &self.max_events)
            .finish()
    }
}

/// Null audit sink (discards all events)
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Fans events out to several sinks
#[derive(Default)]
pub struct CompositeAuditSink {
    sinks: Vec<std::sync::Arc<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(std::sync::Arc::new(sink));
        self
    }

    /// Add a sink that the caller keeps a handle to
    pub fn with_shared(mut self, sink: std::sync::Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for CompositeAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        for sink in &self.sinks {
            sink.record(event.clone())?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        for sink in &self.sinks {
            sink.flush()?;
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.sinks.iter().all(|s| s.is_healthy())
    }
}

impl fmt::Debug for CompositeAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAuditSink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Grant created or overwritten
pub fn grant_added(
    actor: Address,
    height: u64,
    key: GrantKey,
    terms: GrantTerms,
    name: Option<String>,
) -> AuditEvent {
    let event_type = if name.is_some() {
        AuditEventType::NamedGrantAdded
    } else {
        AuditEventType::GrantAdded
    };
    AuditEvent::new(event_type, actor, height, AuditDetails::Grant { name, terms }).with_grant(key)
}

/// Grant deleted, together with `name` when it was a named grant
pub fn grant_removed(actor: Address, height: u64, key: GrantKey, name: Option<String>) -> AuditEvent {
    let event_type = if name.is_some() {
        AuditEventType::NamedGrantRemoved
    } else {
        AuditEventType::GrantRemoved
    };
    AuditEvent::new(event_type, actor, height, AuditDetails::Removal { name }).with_grant(key)
}

/// Authority over the managed account moved to `holder`
pub fn delegated(actor: Address, height: u64, holder: Address, via: Option<GrantKey>) -> AuditEvent {
    let event = AuditEvent::new(
        AuditEventType::Delegated,
        actor,
        height,
        AuditDetails::Authority { holder },
    );
    match via {
        Some(key) => event.with_grant(key),
        None => event,
    }
}

/// Batch outcome
pub fn batch_outcome(
    actor: Address,
    height: u64,
    operations: usize,
    rejection: Option<String>,
) -> AuditEvent {
    let event_type = if rejection.is_some() {
        AuditEventType::BatchRejected
    } else {
        AuditEventType::BatchCommitted
    };
    AuditEvent::new(
        event_type,
        actor,
        height,
        AuditDetails::Batch {
            operations,
            reason: rejection,
        },
    )
}
