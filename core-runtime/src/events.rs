//! # Event Bus System
//!
//! Provides the observation channel of the sync core using
//! `tokio::sync::broadcast`. Every status transition of a sync session or a
//! conflict resolution task is published here with the full updated entity
//! as payload, so dashboards and broadcasters can follow runs without being
//! coupled to the engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   emit    ┌───────────┐   subscribe   ┌────────────┐
//! │ SyncCoordinator  ├──────────>│           ├──────────────>│ Dashboard  │
//! └──────────────────┘           │ EventBus  │               └────────────┘
//!                                │ (broadcast│
//! ┌──────────────────┐   emit    │  channel) │   subscribe   ┌────────────┐
//! │ Conflict tasks   ├──────────>│           ├──────────────>│ Broadcaster│
//! └──────────────────┘           └───────────┘               └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Failed {
//!         session_id: "session-1".to_string(),
//!         owner_id: 7,
//!         message: "Authentication failed".to_string(),
//!         recoverable: false,
//!     }))
//!     .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "Sync failed");
//! # }
//! ```
//!
//! ## Event Types
//!
//! ### Sync Events
//! - `SessionChanged`: A sync session changed status (payload: full session)
//! - `Completed`: A run finished with its applied counts
//! - `Failed`: A run stopped with an error
//!
//! ### Conflict Events
//! - `TaskChanged`: A conflict resolution task changed status (payload: full task)
//! - `AutoResolved`: An auto-resolution pass finished
//!
//! ### Remote Events
//! - `HealthChecked`: Result of the pre-run remote health probe

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError, TryRecvError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sync session events
    Sync(SyncEvent),
    /// Conflict resolution task events
    Conflict(ConflictEvent),
    /// Remote system-of-record events
    Remote(RemoteEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Conflict(e) => e.description(),
            CoreEvent::Remote(e) => e.description(),
        }
    }

    /// The sync session the event belongs to, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Sync(SyncEvent::SessionChanged { session_id, .. })
            | CoreEvent::Sync(SyncEvent::Completed { session_id, .. })
            | CoreEvent::Sync(SyncEvent::Failed { session_id, .. })
            | CoreEvent::Conflict(ConflictEvent::TaskChanged { session_id, .. }) => {
                Some(session_id.as_str())
            }
            CoreEvent::Conflict(ConflictEvent::AutoResolved { .. })
            | CoreEvent::Remote(_) => None,
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Remote(RemoteEvent::HealthChecked { healthy: false, .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::Completed { errors, .. }) if *errors > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Conflict(ConflictEvent::AutoResolved { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events related to sync sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A sync session transitioned to a new status.
    SessionChanged {
        /// The session ID.
        session_id: String,
        /// The list being synced.
        owner_id: i64,
        /// The new status.
        status: String,
        /// The full updated session.
        session: serde_json::Value,
    },
    /// A sync run finished.
    Completed {
        /// The session ID.
        session_id: String,
        /// The list that was synced.
        owner_id: i64,
        /// Local changes pushed to the remote.
        local_applied: u64,
        /// Remote changes applied locally.
        remote_applied: u64,
        /// Conflicts resolved and applied on both sides.
        conflicts_resolved: u64,
        /// Number of per-change errors.
        errors: u64,
        /// Wall-clock duration of the run in milliseconds.
        duration_ms: u64,
    },
    /// A sync run stopped with an error.
    Failed {
        /// The session ID.
        session_id: String,
        /// The list that was being synced.
        owner_id: i64,
        /// Human-readable error message.
        message: String,
        /// Whether the scheduler may retry the run.
        recoverable: bool,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::SessionChanged { .. } => "Sync session status changed",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Failed { .. } => "Sync failed",
        }
    }
}

// ============================================================================
// Conflict Events
// ============================================================================

/// Events related to conflict resolution tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ConflictEvent {
    /// A conflict resolution task was created or changed status.
    TaskChanged {
        /// The task ID.
        task_id: String,
        /// The owning session ID.
        session_id: String,
        /// The new status.
        status: String,
        /// The full updated task.
        task: serde_json::Value,
    },
    /// An auto-resolution pass finished.
    AutoResolved {
        /// The list whose tasks were processed.
        owner_id: i64,
        /// Tasks resolved in this pass.
        resolved: u64,
        /// Tasks still requiring human attention.
        remaining: u64,
    },
}

impl ConflictEvent {
    fn description(&self) -> &str {
        match self {
            ConflictEvent::TaskChanged { .. } => "Conflict task status changed",
            ConflictEvent::AutoResolved { .. } => "Conflicts auto-resolved",
        }
    }
}

// ============================================================================
// Remote Events
// ============================================================================

/// Events related to the remote system-of-record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RemoteEvent {
    /// Result of a remote health probe.
    HealthChecked {
        /// Whether the remote reported itself healthy.
        healthy: bool,
        /// Reported status or error message.
        status: String,
        /// Probe latency, when the probe succeeded.
        latency_ms: Option<u64>,
    },
}

impl RemoteEvent {
    fn description(&self) -> &str {
        match self {
            RemoteEvent::HealthChecked { healthy: true, .. } => "Remote healthy",
            RemoteEvent::HealthChecked { healthy: false, .. } => "Remote unavailable",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel shared by the coordinator and its observers
///
/// Clones publish into the same channel. Emitting with no subscriber is an
/// error the engine ignores.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber before it lags
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Follow a single sync session from the next event on
    pub fn watch_session(&self, session_id: impl Into<String>) -> EventStream {
        EventStream::for_session(self.subscribe(), session_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver that skips events a predicate rejects
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let conflicts_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Conflict(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Session transitions, run outcome and task changes of one session
    pub fn for_session(receiver: Receiver<CoreEvent>, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self::new(receiver).filter(move |event| event.session_id() == Some(session_id.as_str()))
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// # Errors
    ///
    /// `RecvError::Lagged(n)` when `n` events were dropped, `RecvError::Closed`
    /// once every bus clone is gone
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Next buffered matching event, `None` when nothing matching is queued
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(n)) => return Some(Err(RecvError::Lagged(n))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    /// Drain everything currently buffered that matches
    ///
    /// Lagged gaps are skipped.
    pub fn drain(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Some(Ok(event)) => events.push(event),
                Some(Err(RecvError::Lagged(_))) => continue,
                Some(Err(RecvError::Closed)) | None => return events,
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
