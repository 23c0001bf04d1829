//! Pre-flight validation
//!
//! Every mutation passes through a [`Validator`] before anything is
//! written. The checks are pure: they look at the request and, for
//! updates, at the schema the request is based on.
//!
//! ## Rules
//! 1. **Identifiers**: 1-127 characters, `[A-Za-z_][A-Za-z0-9_-]*`, not a
//!    reserved warehouse keyword (any case)
//! 2. **Types**: transformer must be one of the configured transforms
//! 3. **Key protection**: columns whose creation options carry a key
//!    marker cannot be dropped
//! 4. **Ceiling**: the table after the whole batch has at most
//!    `max_columns` columns
//! 5. **Blacklist**: new event names must not match a blacklisted pattern

use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

use config_crate::ConfigError;

use crate::config::ValidationConfig;
use crate::error::{RegistryError, Result};
use crate::replay;
use crate::schema::{Schema, UpdateSchemaRequest};

/// Longest identifier the warehouse accepts
pub const MAX_IDENTIFIER_LENGTH: usize = 127;

/// The schema change validator
#[derive(Debug, Clone)]
pub struct Validator {
    identifier: Regex,
    /// Upper-cased reserved words
    reserved_words: HashSet<String>,
    transforms: HashSet<String>,
    /// Lower-cased key markers
    key_markers: Vec<String>,
    blacklist: Vec<Regex>,
    max_columns: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(&ValidationConfig::default())
            .expect("default validation config has no blacklist patterns")
    }
}

impl Validator {
    /// Build a validator; fails only on a malformed blacklist pattern
    pub fn new(config: &ValidationConfig) -> Result<Self> {
        let blacklist = config
            .event_blacklist
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        RegistryError::Config(ConfigError::Message(format!(
                            "invalid event blacklist pattern '{}': {}",
                            pattern, e
                        )))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            identifier: Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("static pattern"),
            reserved_words: config.reserved_words.iter().map(|w| w.to_uppercase()).collect(),
            transforms: config.valid_transforms.iter().cloned().collect(),
            key_markers: config.key_markers.iter().map(|m| m.to_lowercase()).collect(),
            blacklist,
            max_columns: config.max_columns,
        })
    }

    pub fn max_columns(&self) -> usize {
        self.max_columns
    }

    /// Sorted list of accepted transformer names
    pub fn transforms(&self) -> Vec<String> {
        let mut transforms: Vec<_> = self.transforms.iter().cloned().collect();
        transforms.sort();
        transforms
    }

    /// Check length, syntax and reserved words
    pub fn validate_identifier(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_IDENTIFIER_LENGTH {
            return Err(RegistryError::validation(format!(
                "must be between 1 and {} characters, given length of {}",
                MAX_IDENTIFIER_LENGTH,
                name.len()
            )));
        }
        if !self.identifier.is_match(name) {
            return Err(RegistryError::validation(
                "must begin with alpha or underscore and be composed of alphanumeric, underscore, or hyphen",
            ));
        }
        let upper = name.to_uppercase();
        if self.reserved_words.contains(&upper) {
            return Err(RegistryError::validation(format!(
                "{} is a reserved word",
                upper
            )));
        }
        Ok(())
    }

    /// Check that a transformer is known
    pub fn validate_type(&self, transformer: &str) -> Result<()> {
        if self.transforms.contains(transformer) {
            Ok(())
        } else {
            Err(RegistryError::validation(format!(
                "type '{}' not found",
                transformer
            )))
        }
    }

    /// Refuse creation options that mark a key column
    pub fn validate_is_not_key(&self, creation_options: &str) -> Result<()> {
        let options = creation_options.to_lowercase();
        match self.key_markers.iter().find(|m| options.contains(m.as_str())) {
            Some(marker) => Err(RegistryError::validation(format!(
                "column is a {} column",
                marker
            ))),
            None => Ok(()),
        }
    }

    /// Check an event name destined for a new table
    pub fn validate_event_name(&self, name: &str) -> Result<()> {
        self.validate_identifier(name)
            .map_err(|e| prefixed("Event name invalid", e))?;
        if let Some(pattern) = self.blacklist.iter().find(|p| p.is_match(name)) {
            return Err(RegistryError::validation(format!(
                "Event name {} is blacklisted by pattern '{}'",
                name,
                pattern.as_str()
            )));
        }
        Ok(())
    }

    /// Validate a brand-new schema before its creation is logged
    pub fn pre_validate_schema(&self, schema: &Schema) -> Result<()> {
        self.validate_event_name(&schema.event_name)?;
        if schema.columns.is_empty() {
            return Err(RegistryError::validation("Schema must have at least one column"));
        }
        for column in &schema.columns {
            self.validate_identifier(&column.outbound_name)
                .map_err(|e| prefixed("Column outbound name invalid", e))?;
            self.validate_type(&column.transformer)
                .map_err(|e| prefixed("Column transformer invalid", e))?;
        }
        if schema.columns.len() > self.max_columns {
            return Err(RegistryError::validation(format!(
                "Too many columns, max is {}, given {}",
                self.max_columns,
                schema.columns.len()
            )));
        }
        // Duplicate outbound names surface through the same replay the
        // store uses.
        replay::replay(Schema::new(&schema.event_name), &schema.to_operations())
            .map_err(|e| RegistryError::validation(format!("Invalid column list: {}", e)))?;
        Ok(())
    }

    /// Validate an update against the schema it is based on.
    ///
    /// The whole batch is simulated on a copy of `current`, so conflicts
    /// that only appear once every change is applied are caught here.
    pub fn pre_validate_update(&self, request: &UpdateSchemaRequest, current: &Schema) -> Result<()> {
        if request.event_name != current.event_name {
            return Err(RegistryError::InternalConsistency(format!(
                "update for {} validated against schema of {}",
                request.event_name, current.event_name
            )));
        }
        if request.is_empty() {
            return Err(RegistryError::validation("Update contains no changes"));
        }
        for column in &request.additions {
            self.validate_identifier(&column.outbound_name)
                .map_err(|e| prefixed("Column outbound name invalid", e))?;
            self.validate_type(&column.transformer)
                .map_err(|e| prefixed("Column transformer invalid", e))?;
        }
        for rename in &request.renames {
            self.validate_identifier(&rename.to)
                .map_err(|e| prefixed("Renamed outbound name invalid", e))?;
        }
        for name in &request.deletions {
            if let Some(column) = current.column(name) {
                self.validate_is_not_key(&column.creation_options)
                    .map_err(|e| prefixed(&format!("Cannot delete column {}", name), e))?;
            }
        }

        let simulated = replay::replay(current.clone(), &request.to_operations(current.version + 1))
            .map_err(|e| {
                RegistryError::validation(format!("Error applying operations to table: {}", e))
            })?;
        if simulated.columns.len() > self.max_columns {
            return Err(RegistryError::validation(format!(
                "Too many columns, max is {}, update would result in {}",
                self.max_columns,
                simulated.columns.len()
            )));
        }
        Ok(())
    }
}

/// Prefix a validation message with the field it concerns
fn prefixed(context: &str, err: RegistryError) -> RegistryError {
    match err {
        RegistryError::Validation(msg) => RegistryError::Validation(format!("{}, {}", context, msg)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::ColumnDefinition;

    fn schema_with(n: usize) -> Schema {
        Schema::with_columns(
            "wide_event",
            (0..n)
                .map(|i| ColumnDefinition::new(format!("f{i}"), format!("col_{i}"), "int"))
                .collect(),
        )
    }

    #[test]
    fn test_identifier_length_bounds() {
        let v = Validator::default();
        assert!(v.validate_identifier("a").is_ok());
        assert!(v.validate_identifier(&"a".repeat(127)).is_ok());
        assert!(v.validate_identifier("").is_err());
        assert!(v.validate_identifier(&"a".repeat(128)).is_err());
    }

    #[test]
    fn test_identifier_syntax() {
        let v = Validator::default();
        assert!(v.validate_identifier("_private").is_ok());
        assert!(v.validate_identifier("user-id_2").is_ok());
        assert!(v.validate_identifier("2fast").is_err());
        assert!(v.validate_identifier("has space").is_err());
        assert!(v.validate_identifier("dotted.name").is_err());
    }

    #[test]
    fn test_reserved_words_any_case() {
        let v = Validator::default();
        for word in ["select", "Select", "SELECT", "timestamp"] {
            let err = v.validate_identifier(word).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert!(v.validate_identifier("selected").is_ok());
    }

    #[test]
    fn test_type_membership() {
        let v = Validator::default();
        assert!(v.validate_type("int").is_ok());
        assert!(v.validate_type("INT").is_err());
        assert!(v.validate_type("money").is_err());
    }

    #[test]
    fn test_key_markers() {
        let v = Validator::default();
        assert!(v.validate_is_not_key("distkey").is_err());
        assert!(v.validate_is_not_key("(64) SORTKEY").is_err());
        assert!(v.validate_is_not_key("(64)").is_ok());
        assert!(v.validate_is_not_key("").is_ok());
    }

    #[test]
    fn test_column_ceiling_on_create() {
        let v = Validator::default();
        assert!(v.pre_validate_schema(&schema_with(300)).is_ok());
        assert!(v.pre_validate_schema(&schema_with(301)).is_err());
        assert!(v.pre_validate_schema(&schema_with(0)).is_err());
    }

    #[test]
    fn test_duplicate_columns_on_create() {
        let v = Validator::default();
        let schema = Schema::with_columns(
            "login",
            vec![
                ColumnDefinition::new("a", "user_id", "int"),
                ColumnDefinition::new("b", "user_id", "int"),
            ],
        );
        assert!(v.pre_validate_schema(&schema).is_err());
    }

    #[test]
    fn test_update_ceiling_counts_whole_batch() {
        let v = Validator::default();
        let current = schema_with(299);

        // 299 + 2 - 1 = 300: only valid because the delete is counted too.
        let ok = UpdateSchemaRequest::new("wide_event")
            .add(ColumnDefinition::new("x", "extra_1", "int"))
            .add(ColumnDefinition::new("y", "extra_2", "int"))
            .delete("col_0");
        assert!(v.pre_validate_update(&ok, &current).is_ok());

        let over = UpdateSchemaRequest::new("wide_event")
            .add(ColumnDefinition::new("x", "extra_1", "int"))
            .add(ColumnDefinition::new("y", "extra_2", "int"));
        assert!(v.pre_validate_update(&over, &current).is_err());
    }

    #[test]
    fn test_update_rejects_key_delete() {
        let v = Validator::default();
        let current = Schema::with_columns(
            "login",
            vec![
                ColumnDefinition::new("id", "user_id", "bigint").with_options("distkey"),
                ColumnDefinition::new("c", "country", "varchar"),
            ],
        );
        let request = UpdateSchemaRequest::new("login").delete("user_id");
        let err = v.pre_validate_update(&request, &current).unwrap_err();
        assert!(err.to_string().contains("distkey"));
        assert!(v
            .pre_validate_update(&UpdateSchemaRequest::new("login").delete("country"), &current)
            .is_ok());
    }

    #[test]
    fn test_update_simulation_catches_conflicts() {
        let v = Validator::default();
        let current = Schema::with_columns("login", vec![ColumnDefinition::new("c", "country", "varchar")]);

        let duplicate = UpdateSchemaRequest::new("login").add(ColumnDefinition::new("c", "country", "varchar"));
        assert!(v.pre_validate_update(&duplicate, &current).is_err());

        let missing = UpdateSchemaRequest::new("login").delete("ghost");
        assert!(v.pre_validate_update(&missing, &current).is_err());

        // Add then drop the same name in one batch is fine.
        let churn = UpdateSchemaRequest::new("login")
            .add(ColumnDefinition::new("t", "tmp", "int"))
            .delete("tmp");
        assert!(v.pre_validate_update(&churn, &current).is_ok());

        assert!(v
            .pre_validate_update(&UpdateSchemaRequest::new("login"), &current)
            .is_err());
    }

    #[test]
    fn test_blacklist() {
        let config = ValidationConfig {
            event_blacklist: vec![r"^wow$".into(), r"^logs_dfp_.*$".into()],
            ..ValidationConfig::default()
        };
        let v = Validator::new(&config).unwrap();
        assert!(v.validate_event_name("wow").is_err());
        assert!(v.validate_event_name("WOW").is_err());
        assert!(v.validate_event_name("wow_").is_ok());
        assert!(v.validate_event_name("Logs_dfp_abc").is_err());
        assert!(v.validate_event_name("logs_dfp").is_ok());
    }

    #[test]
    fn test_bad_blacklist_pattern() {
        let config = ValidationConfig {
            event_blacklist: vec!["(unclosed".into()],
            ..ValidationConfig::default()
        };
        assert!(matches!(Validator::new(&config), Err(RegistryError::Config(_))));
    }
}
