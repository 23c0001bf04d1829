//! Operation log entries
//!
//! An [`Operation`] is one immutable row of the log: a single column-level
//! change to one event, stamped with the version it belongs to and its
//! position inside that version.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::ColumnDefinition;

/// Metadata key holding the inbound field name of an added column
pub const META_INBOUND: &str = "inbound";
/// Metadata key holding the transformer of an added column
pub const META_COLUMN_TYPE: &str = "column_type";
/// Metadata key holding the creation options of an added column
pub const META_COLUMN_OPTIONS: &str = "column_options";
/// Metadata key holding the new outbound name of a renamed column
pub const META_NEW_OUTBOUND: &str = "new_outbound";

/// Action-specific payload, stored as a JSON object of strings
pub type ActionMetadata = BTreeMap<String, String>;

/// What an operation does to its target column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Add,
    Delete,
    Rename,
    /// Anything else read back from storage. Replay rejects it.
    Other(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Add => "add",
            Action::Delete => "delete",
            Action::Rename => "rename",
            Action::Other(s) => s,
        }
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        match s {
            "add" => Action::Add,
            "delete" => Action::Delete,
            "rename" => Action::Rename,
            other => Action::Other(other.to_string()),
        }
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        Action::from(s.as_str())
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column-level change recorded in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Event this operation mutates
    pub event: String,
    pub action: Action,
    /// Outbound name the action targets; for `add`, the name introduced
    pub name: String,
    #[serde(default)]
    pub action_metadata: ActionMetadata,
    /// Version shared by every operation of one migration
    pub version: u32,
    /// Zero-based position inside `(event, version)`
    pub ordering: u32,
}

impl Operation {
    /// An `add` operation introducing `column`
    pub fn add(event: impl Into<String>, column: &ColumnDefinition) -> Self {
        let mut metadata = ActionMetadata::new();
        metadata.insert(META_INBOUND.to_string(), column.inbound_name.clone());
        metadata.insert(META_COLUMN_TYPE.to_string(), column.transformer.clone());
        metadata.insert(META_COLUMN_OPTIONS.to_string(), column.creation_options.clone());
        Self {
            event: event.into(),
            action: Action::Add,
            name: column.outbound_name.clone(),
            action_metadata: metadata,
            version: 0,
            ordering: 0,
        }
    }

    /// A `delete` operation dropping `name`
    pub fn delete(event: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            action: Action::Delete,
            name: name.into(),
            action_metadata: ActionMetadata::new(),
            version: 0,
            ordering: 0,
        }
    }

    /// A `rename` operation moving `from` to `to`
    pub fn rename(event: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        let mut metadata = ActionMetadata::new();
        metadata.insert(META_NEW_OUTBOUND.to_string(), to.into());
        Self {
            event: event.into(),
            action: Action::Rename,
            name: from.into(),
            action_metadata: metadata,
            version: 0,
            ordering: 0,
        }
    }

    /// Stamp the log position
    pub fn at(mut self, version: u32, ordering: u32) -> Self {
        self.version = version;
        self.ordering = ordering;
        self
    }

    /// Look up a metadata value, empty when absent
    pub fn meta(&self, key: &str) -> &str {
        self.action_metadata.get(key).map(String::as_str).unwrap_or("")
    }

    /// The column an `add` operation introduces
    pub fn added_column(&self) -> ColumnDefinition {
        ColumnDefinition {
            inbound_name: self.meta(META_INBOUND).to_string(),
            outbound_name: self.name.clone(),
            transformer: self.meta(META_COLUMN_TYPE).to_string(),
            creation_options: self.meta(META_COLUMN_OPTIONS).to_string(),
        }
    }
}
