//! Replay of the operation log
//!
//! The current state of a table is never stored. It is rebuilt by folding
//! the event's operations, in `(version, ordering)` order, over an empty
//! schema. The functions here are pure; the store and the validator both
//! call them.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::error::{RegistryError, Result};
use crate::operation::{Action, Operation, META_NEW_OUTBOUND};
use crate::schema::Schema;

/// Why an operation could not be applied to a schema
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("outbound column '{0}' already exists in schema, cannot add again")]
    AlreadyExists(String),

    #[error("outbound column '{name}' does not exist in schema, cannot {action} it")]
    DoesNotExist { name: String, action: Action },

    #[error("rename of '{0}' carries no new outbound name")]
    MissingNewName(String),

    #[error("unsupported operation action '{0}'")]
    UnsupportedAction(String),
}

/// Apply a single operation to `schema` in place.
///
/// On error the schema may be partially mutated only by earlier calls;
/// this call itself leaves it untouched.
pub fn apply_operation(schema: &mut Schema, op: &Operation) -> std::result::Result<(), ReplayError> {
    match &op.action {
        Action::Add => {
            if schema.position(&op.name).is_some() {
                return Err(ReplayError::AlreadyExists(op.name.clone()));
            }
            schema.columns.push(op.added_column());
        }
        Action::Delete => {
            let idx = schema.position(&op.name).ok_or_else(|| ReplayError::DoesNotExist {
                name: op.name.clone(),
                action: Action::Delete,
            })?;
            schema.columns.remove(idx);
        }
        Action::Rename => {
            let idx = schema.position(&op.name).ok_or_else(|| ReplayError::DoesNotExist {
                name: op.name.clone(),
                action: Action::Rename,
            })?;
            let new_name = op.meta(META_NEW_OUTBOUND);
            if new_name.is_empty() {
                return Err(ReplayError::MissingNewName(op.name.clone()));
            }
            if new_name != op.name && schema.position(new_name).is_some() {
                return Err(ReplayError::AlreadyExists(new_name.to_string()));
            }
            schema.columns[idx].outbound_name = new_name.to_string();
        }
        Action::Other(action) => return Err(ReplayError::UnsupportedAction(action.clone())),
    }
    Ok(())
}

/// Apply operations in order, stopping at the first failure.
///
/// After an error the schema holds an intermediate state and must be
/// discarded; prefer [`replay`] which enforces that by ownership.
pub fn apply_operations<'a, I>(schema: &mut Schema, ops: I) -> std::result::Result<(), ReplayError>
where
    I: IntoIterator<Item = &'a Operation>,
{
    for op in ops {
        apply_operation(schema, op)?;
    }
    Ok(())
}

/// Apply operations to an owned schema, returning it only on success.
pub fn replay<'a, I>(mut schema: Schema, ops: I) -> std::result::Result<Schema, ReplayError>
where
    I: IntoIterator<Item = &'a Operation>,
{
    apply_operations(&mut schema, ops)?;
    Ok(schema)
}

/// Rebuild every schema present in a flat list of log rows.
///
/// Rows are grouped by event and folded in `(version, ordering)` order;
/// each schema's version is the highest version among its rows. Output is
/// sorted by event name.
pub fn generate_schemas(ops: &[Operation]) -> Result<Vec<Schema>> {
    let mut by_event: BTreeMap<&str, Vec<&Operation>> = BTreeMap::new();
    for op in ops {
        by_event.entry(op.event.as_str()).or_default().push(op);
    }

    let mut schemas = Vec::with_capacity(by_event.len());
    for (event, mut rows) in by_event {
        // Stable; a no-op for rows already read in log order.
        rows.sort_by_key(|op| (op.version, op.ordering));

        let mut schema = Schema::new(event);
        for op in rows {
            apply_operation(&mut schema, op).map_err(|reason| RegistryError::Corrupt {
                event: event.to_string(),
                reason,
            })?;
            schema.version = schema.version.max(op.version);
        }
        schemas.push(schema);
    }
    Ok(schemas)
}
