//! Schema types and structures

use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::operation::Operation;

/// One column of an event table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Field name in the ingested payload
    pub inbound_name: String,
    /// Column name in the warehouse table, unique within a schema
    pub outbound_name: String,
    /// Transform applied to the inbound value; doubles as the column type
    pub transformer: String,
    /// Free-text column attributes, may carry key markers such as `distkey`
    #[serde(default)]
    pub creation_options: String,
}

impl ColumnDefinition {
    /// Create a column with no creation options
    pub fn new(
        inbound_name: impl Into<String>,
        outbound_name: impl Into<String>,
        transformer: impl Into<String>,
    ) -> Self {
        Self {
            inbound_name: inbound_name.into(),
            outbound_name: outbound_name.into(),
            transformer: transformer.into(),
            creation_options: String::new(),
        }
    }

    /// Set the creation options
    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.creation_options = options.into();
        self
    }
}

/// The materialized column layout of one event's table.
///
/// Never stored directly: always derived by replaying the operation log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Event name, also the table identifier
    pub event_name: String,
    /// Columns in table order
    pub columns: Vec<ColumnDefinition>,
    /// Highest version recorded for this event
    #[serde(default)]
    pub version: u32,
}

impl Schema {
    /// Create an empty schema at version 0
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            columns: Vec::new(),
            version: 0,
        }
    }

    /// Create a schema from a column list
    pub fn with_columns(event_name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            event_name: event_name.into(),
            columns,
            version: 0,
        }
    }

    /// Get a column by outbound name
    pub fn column(&self, outbound_name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.outbound_name == outbound_name)
    }

    /// Position of a column by outbound name
    pub fn position(&self, outbound_name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.outbound_name == outbound_name)
    }

    /// The log rows that create this schema as version 0
    pub fn to_operations(&self) -> Vec<Operation> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| Operation::add(&self.event_name, c).at(0, i as u32))
            .collect()
    }

    /// Compute the fingerprint of this schema
    pub fn checksum(&self) -> serde_json::Result<Checksum> {
        Checksum::of(self)
    }
}

/// A column rename proposed as part of an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRename {
    pub from: String,
    pub to: String,
}

/// A batch of changes proposed against an event's current schema.
///
/// The batch becomes one migration: additions, then deletions, then
/// renames, all under a single new version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSchemaRequest {
    #[serde(default)]
    pub event_name: String,
    /// Version the caller based the change on; `None` skips the check
    #[serde(default)]
    pub expected_version: Option<u32>,
    #[serde(default)]
    pub additions: Vec<ColumnDefinition>,
    /// Outbound names to drop
    #[serde(default)]
    pub deletions: Vec<String>,
    #[serde(default)]
    pub renames: Vec<ColumnRename>,
}

impl UpdateSchemaRequest {
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            ..Self::default()
        }
    }

    pub fn expecting(mut self, version: u32) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn add(mut self, column: ColumnDefinition) -> Self {
        self.additions.push(column);
        self
    }

    pub fn delete(mut self, outbound_name: impl Into<String>) -> Self {
        self.deletions.push(outbound_name.into());
        self
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.push(ColumnRename {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty() && self.renames.is_empty()
    }

    /// The log rows this request would append, stamped at `version`
    pub fn to_operations(&self, version: u32) -> Vec<Operation> {
        let adds = self
            .additions
            .iter()
            .map(|c| Operation::add(&self.event_name, c));
        let deletes = self
            .deletions
            .iter()
            .map(|name| Operation::delete(&self.event_name, name));
        let renames = self
            .renames
            .iter()
            .map(|r| Operation::rename(&self.event_name, &r.from, &r.to));

        adds.chain(deletes)
            .chain(renames)
            .enumerate()
            .map(|(i, op)| op.at(version, i as u32))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_lookup() {
        let schema = Schema::with_columns(
            "login_success",
            vec![
                ColumnDefinition::new("userId", "user_id", "bigint"),
                ColumnDefinition::new("country", "country", "varchar").with_options("(32)"),
            ],
        );
        assert_eq!(schema.position("country"), Some(1));
        assert_eq!(schema.column("country").unwrap().creation_options, "(32)");
        assert!(schema.column("missing").is_none());
    }

    #[test]
    fn test_checksum_tracks_version() {
        let mut schema = Schema::with_columns(
            "login_success",
            vec![ColumnDefinition::new("userId", "user_id", "bigint")],
        );
        let before = schema.checksum().unwrap();
        assert_eq!(before, schema.clone().checksum().unwrap());
        schema.version = 1;
        assert_ne!(before, schema.checksum().unwrap());
    }

    #[test]
    fn test_request_operation_ordering() {
        let request = UpdateSchemaRequest::new("login")
            .rename("cntry", "country")
            .delete("legacy")
            .add(ColumnDefinition::new("ts", "ts", "f@timestamp@unix"));
        let ops = request.to_operations(4);
        let actions: Vec<_> = ops.iter().map(|o| o.action.as_str()).collect();
        assert_eq!(actions, ["add", "delete", "rename"]);
        assert!(ops.iter().all(|o| o.version == 4 && o.event == "login"));
        assert_eq!(ops.iter().map(|o| o.ordering).collect::<Vec<_>>(), [0, 1, 2]);
    }
}
