//! Version Store
//!
//! Owns the operation log table and is the only writer to it. Reads
//! replay the log on every call; writes append one migration per SQLite
//! transaction.
//!
//! ## Concurrency
//!
//! The store holds no connection and no cached state: each call opens its
//! own connection, so one `VersionStore` can be shared across threads.
//! Concurrent writers are detected, not merged. Writes take SQLite's write
//! lock when their transaction begins, then read the latest version and
//! append rows under the next one. A writer that queued behind a winner
//! sees the moved version and surfaces [`RegistryError::VersionConflict`];
//! two creates of one event meet on the `(event, version, ordering)`
//! primary key and the loser gets [`RegistryError::AlreadyExists`]. A lock
//! still held when `busy_timeout_ms` runs out is a plain
//! [`RegistryError::Storage`] failure, not a conflict.
//! Retrying is the caller's job.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{
    ffi, params, Connection, ErrorCode, OpenFlags, OptionalExtension, Transaction,
    TransactionBehavior,
};
use rusqlite::types::Type;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{RegistryConfig, StoreConfig};
use crate::error::{RegistryError, Result};
use crate::operation::{Action, ActionMetadata, Operation};
use crate::replay;
use crate::schema::{Schema, UpdateSchemaRequest};
use crate::validate::Validator;

/// One version of an event as recorded in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionSummary {
    pub version: u32,
    /// Number of operations in the migration
    pub operations: usize,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// SQL text for one configured table name
#[derive(Debug, Clone)]
struct Queries {
    create_table: String,
    event_operations: String,
    event_operations_up_to: String,
    all_operations: String,
    migration: String,
    current_version: String,
    insert: String,
    versions: String,
}

impl Queries {
    fn new(table: &str) -> Self {
        let cols = "event, action, name, version, ordering, action_metadata";
        Self {
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS \"{table}\" (
                    event TEXT NOT NULL,
                    action TEXT NOT NULL,
                    name TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    ordering INTEGER NOT NULL,
                    action_metadata TEXT NOT NULL,
                    recorded_at TEXT NOT NULL,
                    PRIMARY KEY (event, version, ordering)
                )"
            ),
            event_operations: format!(
                "SELECT {cols} FROM \"{table}\" WHERE event = ?1
                 ORDER BY version ASC, ordering ASC"
            ),
            event_operations_up_to: format!(
                "SELECT {cols} FROM \"{table}\" WHERE event = ?1 AND version <= ?2
                 ORDER BY version ASC, ordering ASC"
            ),
            all_operations: format!(
                "SELECT {cols} FROM \"{table}\" ORDER BY version ASC, ordering ASC"
            ),
            migration: format!(
                "SELECT {cols} FROM \"{table}\" WHERE event = ?1 AND version = ?2
                 ORDER BY ordering ASC"
            ),
            current_version: format!("SELECT MAX(version) FROM \"{table}\" WHERE event = ?1"),
            insert: format!(
                "INSERT INTO \"{table}\" ({cols}, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            versions: format!(
                "SELECT version, COUNT(*), MIN(recorded_at) FROM \"{table}\" WHERE event = ?1
                 GROUP BY version ORDER BY version ASC"
            ),
        }
    }
}

/// The operation-log backed schema store
#[derive(Debug, Clone)]
pub struct VersionStore {
    config: StoreConfig,
    validator: Validator,
    queries: Queries,
}

impl VersionStore {
    /// Open the store, creating the log table if needed
    pub fn open(config: &RegistryConfig) -> Result<Self> {
        let validator = Validator::new(&config.validation)?;
        validator.validate_identifier(&config.store.table).map_err(|e| {
            RegistryError::validation(format!("Operation log table name invalid: {}", e))
        })?;

        let store = Self {
            config: config.store.clone(),
            validator,
            queries: Queries::new(&config.store.table),
        };

        let conn = store.connect()?;
        // Journal mode persists in the database file; set it once here.
        let _mode: String = conn.query_row(
            &format!("PRAGMA journal_mode = {}", store.config.journal_mode.pragma_value()),
            [],
            |row| row.get(0),
        )?;
        conn.execute(&store.queries.create_table, [])?;
        info!(
            path = %store.config.path.display(),
            table = %store.config.table,
            "Opened operation log"
        );
        Ok(store)
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    fn connect(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.config.path, flags)?;
        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))?;
        Ok(conn)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Current schema of `event`
    pub fn schema(&self, event: &str) -> Result<Schema> {
        let conn = self.connect()?;
        let ops = query_operations(&conn, &self.queries.event_operations, params![event])?;
        debug!(event, operations = ops.len(), "Replaying event");
        single_schema(event, None, &ops)
    }

    /// Schema of `event` as it stood at `version`
    pub fn schema_at(&self, event: &str, version: u32) -> Result<Schema> {
        let conn = self.connect()?;
        let ops = query_operations(
            &conn,
            &self.queries.event_operations_up_to,
            params![event, version],
        )?;
        let schema = single_schema(event, Some(version), &ops)?;
        if schema.version != version {
            return Err(RegistryError::not_found(event, Some(version)));
        }
        Ok(schema)
    }

    /// Current schema of every event, sorted by event name
    pub fn all_schemas(&self) -> Result<Vec<Schema>> {
        let conn = self.connect()?;
        let ops = query_operations(&conn, &self.queries.all_operations, [])?;
        debug!(operations = ops.len(), "Replaying all events");
        replay::generate_schemas(&ops)
    }

    /// The operations that produced `version` of `event`
    pub fn migration(&self, event: &str, version: u32) -> Result<Vec<Operation>> {
        let conn = self.connect()?;
        let ops = query_operations(&conn, &self.queries.migration, params![event, version])?;
        if ops.is_empty() {
            return Err(RegistryError::not_found(event, Some(version)));
        }
        Ok(ops)
    }

    /// Latest version of `event`, if it exists
    pub fn current_version(&self, event: &str) -> Result<Option<u32>> {
        let conn = self.connect()?;
        current_version(&conn, &self.queries.current_version, event)
    }

    /// Every version of `event` with its operation count
    pub fn versions(&self, event: &str) -> Result<Vec<VersionSummary>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&self.queries.versions)?;
        let rows = stmt.query_map(params![event], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (version, count, recorded_at) = row?;
            summaries.push(VersionSummary {
                version,
                operations: count as usize,
                recorded_at: recorded_at
                    .map(|ts| parse_recorded_at(event, version, &ts))
                    .transpose()?,
            });
        }
        if summaries.is_empty() {
            return Err(RegistryError::not_found(event, None));
        }
        Ok(summaries)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Log a new schema as version 0.
    ///
    /// A concurrent or repeated create of the same event loses on the
    /// primary key and gets [`RegistryError::AlreadyExists`]. Lock
    /// timeouts and other SQLite failures roll back and surface as
    /// [`RegistryError::Storage`].
    pub fn create_schema(&self, schema: &Schema) -> Result<()> {
        if let Err(e) = self.validator.pre_validate_schema(schema) {
            warn!(event = %schema.event_name, error = %e, "Rejected schema creation");
            return Err(e);
        }

        let ops = schema.to_operations();
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Err(e) = insert_operations(&tx, &self.queries.insert, &ops) {
            tx.rollback()?;
            if is_key_violation(&e) {
                warn!(event = %schema.event_name, "Schema creation lost to an existing schema");
                return Err(RegistryError::AlreadyExists {
                    event: schema.event_name.clone(),
                });
            }
            error!(event = %schema.event_name, error = %e, "Failed to log schema creation");
            return Err(e.into());
        }
        if let Err(e) = tx.commit() {
            error!(event = %schema.event_name, error = %e, "Failed to commit schema creation");
            return Err(e.into());
        }

        info!(
            event = %schema.event_name,
            columns = schema.columns.len(),
            "Created schema"
        );
        Ok(())
    }

    /// Validate and log one migration; returns the new version.
    ///
    /// Validation runs against the schema read before the transaction.
    /// Inside the transaction the latest version is read again, and the
    /// write only proceeds if it still matches both the validated schema
    /// and the caller's `expected_version`.
    pub fn update_schema(&self, request: &UpdateSchemaRequest) -> Result<u32> {
        let event = request.event_name.as_str();
        let current = self.schema(event)?;
        let expected = request.expected_version.unwrap_or(current.version);
        if expected != current.version {
            warn!(event, expected, actual = current.version, "Update based on stale version");
            return Err(RegistryError::VersionConflict {
                event: event.to_string(),
                expected,
                actual: current.version,
            });
        }
        if let Err(e) = self.validator.pre_validate_update(request, &current) {
            warn!(event, error = %e, "Rejected schema update");
            return Err(e);
        }

        let mut conn = self.connect()?;
        // Write lock first: the version read below cannot go stale before commit.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let latest = match current_version(&tx, &self.queries.current_version, event) {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                tx.rollback()?;
                return Err(RegistryError::not_found(event, None));
            }
            Err(e) => {
                tx.rollback()?;
                return Err(e);
            }
        };
        if latest != current.version {
            tx.rollback()?;
            warn!(event, expected, actual = latest, "Schema moved during update");
            return Err(RegistryError::VersionConflict {
                event: event.to_string(),
                expected,
                actual: latest,
            });
        }

        let new_version = latest + 1;
        let ops = request.to_operations(new_version);

        if let Err(e) = insert_operations(&tx, &self.queries.insert, &ops) {
            tx.rollback()?;
            if is_key_violation(&e) || is_stale_snapshot(&e) {
                warn!(event, version = new_version, error = %e, "Lost update race");
                return Err(self.moved_past(event, expected));
            }
            error!(event, version = new_version, error = %e, "Failed to log schema update");
            return Err(e.into());
        }
        if let Err(e) = tx.commit() {
            if is_stale_snapshot(&e) {
                warn!(event, version = new_version, error = %e, "Lost update race at commit");
                return Err(self.moved_past(event, expected));
            }
            error!(event, version = new_version, error = %e, "Failed to commit schema update");
            return Err(e.into());
        }

        info!(event, version = new_version, operations = ops.len(), "Updated schema");
        Ok(new_version)
    }

    /// Conflict for a writer that lost, reporting the version that won
    fn moved_past(&self, event: &str, expected: u32) -> RegistryError {
        match self.current_version(event) {
            Ok(Some(actual)) => RegistryError::VersionConflict {
                event: event.to_string(),
                expected,
                actual,
            },
            Ok(None) => RegistryError::not_found(event, None),
            Err(e) => e,
        }
    }
}

/// Replay rows of one event and insist on exactly one schema
fn single_schema(event: &str, version: Option<u32>, ops: &[Operation]) -> Result<Schema> {
    let mut schemas = replay::generate_schemas(ops)?;
    match schemas.len() {
        0 => Err(RegistryError::not_found(event, version)),
        1 => Ok(schemas.remove(0)),
        n => Err(RegistryError::InternalConsistency(format!(
            "expected one schema for {}, replay produced {}",
            event, n
        ))),
    }
}

fn query_operations<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Operation>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, u32>(3)?,
            row.get::<_, u32>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut ops = Vec::new();
    for row in rows {
        let (event, action, name, version, ordering, metadata) = row?;
        let action_metadata: ActionMetadata = serde_json::from_str(&metadata)?;
        ops.push(Operation {
            event,
            action: Action::from(action),
            name,
            action_metadata,
            version,
            ordering,
        });
    }
    Ok(ops)
}

fn parse_recorded_at(event: &str, version: u32, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            error!(event, version, recorded_at = raw, error = %e, "Malformed timestamp in operation log");
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
        })
}

fn current_version(conn: &Connection, sql: &str, event: &str) -> Result<Option<u32>> {
    let version = conn
        .query_row(sql, params![event], |row| row.get::<_, Option<u32>>(0))
        .optional()?;
    Ok(version.flatten())
}

fn insert_operations(tx: &Transaction<'_>, sql: &str, ops: &[Operation]) -> rusqlite::Result<()> {
    let recorded_at = Utc::now().to_rfc3339();
    let mut stmt = tx.prepare(sql)?;
    for op in ops {
        let metadata = serde_json::to_string(&op.action_metadata)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        stmt.execute(params![
            op.event,
            op.action.as_str(),
            op.name,
            op.version,
            op.ordering,
            metadata,
            recorded_at,
        ])?;
    }
    Ok(())
}

/// Another row already holds this `(event, version, ordering)`
fn is_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// `SQLITE_BUSY_SNAPSHOT`: the transaction read a version another writer has since replaced
fn is_stale_snapshot(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == ffi::SQLITE_BUSY_SNAPSHOT
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::ColumnDefinition;
    use tempfile::{tempdir, TempDir};

    fn open_store() -> (TempDir, VersionStore) {
        let dir = tempdir().unwrap();
        let config = RegistryConfig::with_store_path(dir.path().join("registry.db"));
        let store = VersionStore::open(&config).unwrap();
        (dir, store)
    }

    fn login() -> Schema {
        Schema::with_columns(
            "login_success",
            vec![ColumnDefinition::new("userId", "user_id", "int")],
        )
    }

    #[test]
    fn test_empty_store() {
        let (_dir, store) = open_store();
        assert!(store.all_schemas().unwrap().is_empty());
        assert_eq!(store.schema("nope").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.current_version("nope").unwrap(), None);
    }

    #[test]
    fn test_create_round_trip() {
        let (_dir, store) = open_store();
        store.create_schema(&login()).unwrap();

        let schema = store.schema("login_success").unwrap();
        assert_eq!(schema.columns, login().columns);
        assert_eq!(schema.version, 0);
        assert_eq!(store.current_version("login_success").unwrap(), Some(0));
    }

    #[test]
    fn test_duplicate_create() {
        let (_dir, store) = open_store();
        store.create_schema(&login()).unwrap();
        match store.create_schema(&login()).unwrap_err() {
            RegistryError::AlreadyExists { event } => assert_eq!(event, "login_success"),
            other => panic!("Expected AlreadyExists, got {:?}", other),
        }
    }

    #[test]
    fn test_update_appends_migration() {
        let (_dir, store) = open_store();
        store.create_schema(&login()).unwrap();

        let request = UpdateSchemaRequest::new("login_success")
            .add(ColumnDefinition::new("country", "country", "string"));
        assert_eq!(store.update_schema(&request).unwrap(), 1);

        let migration = store.migration("login_success", 1).unwrap();
        assert_eq!(migration.len(), 1);
        assert_eq!(migration[0].action, Action::Add);
        assert_eq!(migration[0].name, "country");

        let versions = store.versions("login_success").unwrap();
        assert_eq!(versions.iter().map(|v| v.version).collect::<Vec<_>>(), [0, 1]);
        assert!(versions.iter().all(|v| v.recorded_at.is_some()));
    }

    #[test]
    fn test_schema_at_version() {
        let (_dir, store) = open_store();
        store.create_schema(&login()).unwrap();
        store
            .update_schema(&UpdateSchemaRequest::new("login_success").rename("user_id", "account_id"))
            .unwrap();

        assert_eq!(store.schema_at("login_success", 0).unwrap().columns[0].outbound_name, "user_id");
        assert_eq!(store.schema_at("login_success", 1).unwrap().columns[0].outbound_name, "account_id");
        assert_eq!(store.schema_at("login_success", 2).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.migration("login_success", 7).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_corrupt_metadata_is_storage_error() {
        let (dir, store) = open_store();
        store.create_schema(&login()).unwrap();

        let conn = Connection::open(dir.path().join("registry.db")).unwrap();
        conn.execute("UPDATE operation SET action_metadata = 'not json'", []).unwrap();

        let err = store.schema("login_success").unwrap_err();
        assert!(matches!(err, RegistryError::Json(_)));
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_malformed_timestamp_is_storage_error() {
        let (dir, store) = open_store();
        store.create_schema(&login()).unwrap();

        let conn = Connection::open(dir.path().join("registry.db")).unwrap();
        conn.execute("UPDATE operation SET recorded_at = 'yesterday'", []).unwrap();

        let err = store.versions("login_success").unwrap_err();
        assert!(matches!(err, RegistryError::Storage(_)));
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_custom_table_name() {
        let dir = tempdir().unwrap();
        let mut config = RegistryConfig::with_store_path(dir.path().join("registry.db"));
        config.store.table = "event_operation".into();
        let store = VersionStore::open(&config).unwrap();
        store.create_schema(&login()).unwrap();
        assert_eq!(store.all_schemas().unwrap().len(), 1);

        config.store.table = "select".into();
        assert!(VersionStore::open(&config).is_err());
    }
}
