//! Domain models for the list store
//!
//! Lists own their items. Both carry the bookkeeping the sync engine needs:
//! an optional identifier in the remote system and the instant of the last
//! successful sync.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length of a list name in characters
pub const MAX_LIST_NAME_LEN: usize = 255;

/// Maximum length of an item description in characters
pub const MAX_ITEM_DESCRIPTION_LEN: usize = 500;

// =============================================================================
// ID Types
// =============================================================================

/// Local identifier of a todo list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TodoListId(pub i64);

impl fmt::Display for TodoListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TodoListId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Local identifier of a todo item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TodoItemId(pub i64);

impl fmt::Display for TodoItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TodoItemId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// =============================================================================
// Timestamp helpers
// =============================================================================

/// Convert a timestamp to the Unix milliseconds stored in the database
pub fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

/// Convert stored Unix milliseconds back into a timestamp
///
/// Out-of-range values clamp to the Unix epoch.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn needs_sync(synced_at: Option<DateTime<Utc>>, updated_at: DateTime<Utc>) -> bool {
    match synced_at {
        None => true,
        Some(synced) => synced < updated_at,
    }
}

// =============================================================================
// Domain Models
// =============================================================================

/// The owning record of a sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoList {
    pub id: TodoListId,
    pub name: String,
    /// Identifier of the list in the remote system
    pub external_id: Option<String>,
    pub sync_enabled: bool,
    /// When the list was last reconciled with the remote system
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TodoList {
    /// Validate list data
    pub fn validate(&self) -> Result<(), String> {
        validate_text("List name", &self.name, MAX_LIST_NAME_LEN)
    }

    /// Whether the list has local modifications the remote has not seen
    ///
    /// Always false while sync is disabled.
    pub fn needs_sync(&self) -> bool {
        self.sync_enabled && needs_sync(self.synced_at, self.updated_at)
    }

    /// Turn sync on, keeping or generating the remote identifier
    ///
    /// An explicit `external_id` always wins. Without one, an existing
    /// identifier is kept and a fresh `todolist_<id>_<hex>` is generated
    /// only for lists that never had one.
    pub fn enable_sync(&mut self, external_id: Option<String>, now: DateTime<Utc>) {
        self.sync_enabled = true;
        self.external_id = external_id
            .or_else(|| self.external_id.take())
            .or_else(|| Some(self.generate_external_id()));
        self.updated_at = now;
    }

    /// Turn sync off. The remote identifier is retained for re-enabling.
    pub fn disable_sync(&mut self, now: DateTime<Utc>) {
        self.sync_enabled = false;
        self.updated_at = now;
    }

    fn generate_external_id(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("todolist_{}_{}", self.id, &suffix[..8])
    }
}

/// Partial update of a list. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoListUpdate {
    pub name: Option<String>,
    pub mark_synced: bool,
}

impl TodoListUpdate {
    pub fn validate(&self) -> Result<(), String> {
        match &self.name {
            Some(name) => validate_text("List name", name, MAX_LIST_NAME_LEN),
            None => Ok(()),
        }
    }
}

/// Data needed to create a list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTodoList {
    pub name: String,
    pub external_id: Option<String>,
    pub sync_enabled: bool,
}

impl NewTodoList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_id: None,
            sync_enabled: false,
        }
    }

    /// Create the list with sync enabled against the given remote identifier
    pub fn synced_with(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self.sync_enabled = true;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_text("List name", &self.name, MAX_LIST_NAME_LEN)
    }
}

/// A child record of a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: TodoItemId,
    pub list_id: TodoListId,
    pub description: String,
    pub completed: bool,
    /// Identifier of the item in the remote system
    pub external_id: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TodoItem {
    pub fn validate(&self) -> Result<(), String> {
        validate_text("Item description", &self.description, MAX_ITEM_DESCRIPTION_LEN)
    }

    /// Whether the item changed since it was last synced
    pub fn needs_sync(&self) -> bool {
        needs_sync(self.synced_at, self.updated_at)
    }
}

/// Data needed to create an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTodoItem {
    pub list_id: TodoListId,
    pub description: String,
    pub completed: bool,
    pub external_id: Option<String>,
    /// Stamp `synced_at` on insert; set when the item originates remotely
    pub synced: bool,
}

impl NewTodoItem {
    pub fn new(list_id: TodoListId, description: impl Into<String>) -> Self {
        Self {
            list_id,
            description: description.into(),
            completed: false,
            external_id: None,
            synced: false,
        }
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    /// Mark the item as a copy of a remote record
    pub fn from_remote(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self.synced = true;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_text("Item description", &self.description, MAX_ITEM_DESCRIPTION_LEN)
    }
}

/// Partial update of an item. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoItemUpdate {
    pub description: Option<String>,
    pub completed: Option<bool>,
    /// Stamp `synced_at` with the same instant as `updated_at`
    pub mark_synced: bool,
}

impl TodoItemUpdate {
    pub fn validate(&self) -> Result<(), String> {
        match &self.description {
            Some(description) => {
                validate_text("Item description", description, MAX_ITEM_DESCRIPTION_LEN)
            }
            None => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.completed.is_none() && !self.mark_synced
    }
}

fn validate_text(label: &str, value: &str, max_len: usize) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} cannot be empty", label));
    }

    let len = value.chars().count();
    if len > max_len {
        return Err(format!(
            "{} is too long ({} characters, maximum is {})",
            label, len, max_len
        ));
    }

    Ok(())
}
