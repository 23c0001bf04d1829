//! Configuration management for the schema registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (registry.toml)
//! - Environment variables (REGISTRY__*)
//!
//! ## Example config file (registry.toml):
//! ```toml
//! [store]
//! path = "/var/lib/registry/registry.db"
//! table = "operation"
//! busy_timeout_ms = 5000
//! journal_mode = "wal"
//!
//! [validation]
//! max_columns = 300
//! key_markers = ["distkey", "sortkey"]
//! event_blacklist = ["^logs\\.dfp_.*$"]
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Column ceiling of the destination warehouse
pub const DEFAULT_MAX_COLUMNS: usize = 300;

/// Keywords the destination warehouse refuses as identifiers
pub const RESERVED_WORDS: &[&str] = &[
    "AES128", "AES256", "ALL", "ALLOWOVERWRITE", "ANALYSE", "ANALYZE", "AND", "ANY", "ARRAY",
    "AS", "ASC", "AUTHORIZATION", "BACKUP", "BETWEEN", "BINARY", "BLANKSASNULL", "BOTH",
    "BYTEDICT", "BZIP2", "CASE", "CAST", "CHECK", "COLLATE", "COLUMN", "CONSTRAINT", "CREATE",
    "CREDENTIALS", "CROSS", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER",
    "CURRENT_USER_ID", "DEFAULT", "DEFERRABLE", "DEFLATE", "DEFRAG", "DELTA", "DELTA32K", "DESC",
    "DISABLE", "DISTINCT", "DO", "ELSE", "EMPTYASNULL", "ENABLE", "ENCODE", "ENCRYPT",
    "ENCRYPTION", "END", "EXCEPT", "EXPLICIT", "FALSE", "FOR", "FOREIGN", "FREEZE", "FROM",
    "FULL", "GLOBALDICT256", "GLOBALDICT64K", "GRANT", "GROUP", "GZIP", "HAVING", "IDENTITY",
    "IGNORE", "ILIKE", "IN", "INITIALLY", "INNER", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN",
    "LEADING", "LEFT", "LIKE", "LIMIT", "LOCALTIME", "LOCALTIMESTAMP", "LUN", "LUNS", "LZO",
    "LZOP", "MINUS", "MOSTLY13", "MOSTLY32", "MOSTLY8", "NATURAL", "NEW", "NOT", "NOTNULL",
    "NULL", "NULLS", "OFF", "OFFLINE", "OFFSET", "OLD", "ON", "ONLY", "OPEN", "OR", "ORDER",
    "OUTER", "OVERLAPS", "PARALLEL", "PARTITION", "PERCENT", "PERMISSIONS", "PLACING", "PRIMARY",
    "RAW", "READRATIO", "RECOVER", "REFERENCES", "RESPECT", "REJECTLOG", "RESORT", "RESTORE",
    "RIGHT", "SELECT", "SESSION_USER", "SIMILAR", "SOME", "SYSDATE", "SYSTEM", "TABLE", "TAG",
    "TDES", "TEXT255", "TEXT32K", "THEN", "TIMESTAMP", "TO", "TOP", "TRAILING", "TRUE",
    "TRUNCATECOLUMNS", "UNION", "UNIQUE", "USER", "USING", "VERBOSE", "WALLET", "WHEN", "WHERE",
    "WITH", "WITHOUT",
];

/// Transform names the ingestion pipeline knows how to apply
pub const DEFAULT_TRANSFORMS: &[&str] = &[
    "bigint",
    "bool",
    "float",
    "int",
    "string",
    "varchar",
    "f@timestamp@unix",
    "f@timestamp@unix-utc",
    "ipAsn",
    "ipAsnInteger",
    "ipCity",
    "ipCountry",
    "ipRegion",
    "userIDWithMapping",
];

/// Main configuration for the schema registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Operation log storage
    #[serde(default)]
    pub store: StoreConfig,

    /// Validation settings
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Operation log storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Name of the operation log table
    #[serde(default = "default_table")]
    pub table: String,

    /// How long a writer waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// SQLite journal mode
    #[serde(default)]
    pub journal_mode: JournalMode,
}

/// SQLite journal mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
}

impl JournalMode {
    pub fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Wal => "wal",
            JournalMode::Delete => "delete",
        }
    }
}

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Maximum number of columns per table
    #[serde(default = "default_max_columns")]
    pub max_columns: usize,

    /// Identifiers refused regardless of case
    #[serde(default = "default_reserved_words")]
    pub reserved_words: Vec<String>,

    /// Accepted transformer names
    #[serde(default = "default_transforms")]
    pub valid_transforms: Vec<String>,

    /// Substrings of creation options that mark a key column
    #[serde(default = "default_key_markers")]
    pub key_markers: Vec<String>,

    /// Regexes of event names that may not get a table
    #[serde(default)]
    pub event_blacklist: Vec<String>,
}

// Default value functions
fn default_store_path() -> PathBuf {
    PathBuf::from("registry.db")
}

fn default_table() -> String {
    "operation".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_max_columns() -> usize {
    DEFAULT_MAX_COLUMNS
}

fn default_reserved_words() -> Vec<String> {
    RESERVED_WORDS.iter().map(|w| w.to_string()).collect()
}

fn default_transforms() -> Vec<String> {
    DEFAULT_TRANSFORMS.iter().map(|t| t.to_string()).collect()
}

fn default_key_markers() -> Vec<String> {
    vec!["distkey".to_string(), "sortkey".to_string()]
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            table: default_table(),
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: JournalMode::Wal,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_columns: default_max_columns(),
            reserved_words: default_reserved_words(),
            valid_transforms: default_transforms(),
            key_markers: default_key_markers(),
            event_blacklist: Vec::new(),
        }
    }
}

impl RegistryConfig {
    /// Default configuration with the store at `path`
    pub fn with_store_path(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.store.path = path.into();
        config
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["registry.toml", ".registry.toml", "config/registry.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "event-schemas") {
            let xdg_config = config_dir.config_dir().join("registry.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (REGISTRY__STORE__PATH, ...)
        builder = builder.add_source(
            Environment::with_prefix("REGISTRY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.validation.max_columns, 300);
        assert_eq!(config.store.table, "operation");
        assert!(config.validation.valid_transforms.iter().any(|t| t == "int"));
        assert!(config.validation.reserved_words.iter().any(|w| w == "SELECT"));
    }

    #[test]
    fn test_serialize_config() {
        let config = RegistryConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[store]"));
        assert!(toml_str.contains("[validation]"));
        assert!(toml_str.contains("journal_mode = \"wal\""));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(
            &path,
            "[store]\ntable = \"event_operation\"\n\n[validation]\nmax_columns = 10\n",
        )
        .unwrap();

        let config = RegistryConfig::load_from(path.to_str()).unwrap();
        assert_eq!(config.store.table, "event_operation");
        assert_eq!(config.store.busy_timeout_ms, 5_000);
        assert_eq!(config.validation.max_columns, 10);
        assert_eq!(config.validation.key_markers, ["distkey", "sortkey"]);
    }
}
