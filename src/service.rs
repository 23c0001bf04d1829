//! Schema Service
//!
//! The surface consumed by the HTTP layer and by the schema-suggestion
//! pipeline. [`SchemaBackend`] is the storage capability; [`VersionStore`]
//! is its one implementation. [`SchemaService`] composes a backend into
//! the request-level contract.

use tracing::{info, warn};

use crate::error::{RegistryError, Result};
use crate::operation::Operation;
use crate::schema::{ColumnDefinition, Schema, UpdateSchemaRequest};
use crate::store::{VersionStore, VersionSummary};

/// Storage capability behind the schema service
pub trait SchemaBackend: Send + Sync {
    /// Current schema of every event
    fn all_schemas(&self) -> Result<Vec<Schema>>;

    /// Current schema of one event
    fn schema(&self, event: &str) -> Result<Schema>;

    /// Schema of one event at a past version
    fn schema_at(&self, event: &str, version: u32) -> Result<Schema>;

    /// The operations that produced one version
    fn migration(&self, event: &str, version: u32) -> Result<Vec<Operation>>;

    /// Version history of one event
    fn versions(&self, event: &str) -> Result<Vec<VersionSummary>>;

    fn create_schema(&self, schema: &Schema) -> Result<()>;

    /// Append one migration and return its version
    fn update_schema(&self, request: &UpdateSchemaRequest) -> Result<u32>;

    /// Accepted transformer names
    fn transforms(&self) -> Vec<String>;
}

impl SchemaBackend for VersionStore {
    fn all_schemas(&self) -> Result<Vec<Schema>> {
        VersionStore::all_schemas(self)
    }

    fn schema(&self, event: &str) -> Result<Schema> {
        VersionStore::schema(self, event)
    }

    fn schema_at(&self, event: &str, version: u32) -> Result<Schema> {
        VersionStore::schema_at(self, event, version)
    }

    fn migration(&self, event: &str, version: u32) -> Result<Vec<Operation>> {
        VersionStore::migration(self, event, version)
    }

    fn versions(&self, event: &str) -> Result<Vec<VersionSummary>> {
        VersionStore::versions(self, event)
    }

    fn create_schema(&self, schema: &Schema) -> Result<()> {
        VersionStore::create_schema(self, schema)
    }

    fn update_schema(&self, request: &UpdateSchemaRequest) -> Result<u32> {
        VersionStore::update_schema(self, request)
    }

    fn transforms(&self) -> Vec<String> {
        self.validator().transforms()
    }
}

/// Request-level schema operations over a backend
pub struct SchemaService<B = VersionStore> {
    backend: B,
}

impl<B: SchemaBackend> SchemaService<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Every current schema, for the schema listing
    pub fn get_all_schemas(&self) -> Result<Vec<Schema>> {
        self.backend.all_schemas()
    }

    /// Current schema, or the schema at `version` when given.
    ///
    /// A missing event and a missing version both come back as
    /// [`RegistryError::NotFound`].
    pub fn get_schema(&self, event: &str, version: Option<u32>) -> Result<Schema> {
        match version {
            Some(version) => self.backend.schema_at(event, version),
            None => self.backend.schema(event),
        }
    }

    /// What `version` changed
    pub fn get_migration(&self, event: &str, version: u32) -> Result<Vec<Operation>> {
        self.backend.migration(event, version)
    }

    pub fn get_versions(&self, event: &str) -> Result<Vec<VersionSummary>> {
        self.backend.versions(event)
    }

    pub fn create_schema(&self, event: &str, columns: Vec<ColumnDefinition>) -> Result<Schema> {
        let schema = Schema::with_columns(event, columns);
        self.backend.create_schema(&schema)?;
        Ok(schema)
    }

    /// Apply `request` only if the event is still at `expected_version`.
    ///
    /// The version is compared before validation and again inside the
    /// write transaction; either mismatch is a
    /// [`RegistryError::VersionConflict`] and nothing is written.
    pub fn update_schema(&self, expected_version: u32, request: UpdateSchemaRequest) -> Result<Schema> {
        let request = request.expecting(expected_version);
        let observed = self.backend.schema(&request.event_name)?.version;
        if observed != expected_version {
            warn!(
                event = %request.event_name,
                expected = expected_version,
                actual = observed,
                "Newer version of schema already exists"
            );
            return Err(RegistryError::VersionConflict {
                event: request.event_name,
                expected: expected_version,
                actual: observed,
            });
        }

        let version = self.backend.update_schema(&request)?;
        info!(event = %request.event_name, version, "Migration applied");
        self.backend.schema_at(&request.event_name, version)
    }

    /// Every tracked event, polled by the schema-suggestion pipeline
    pub fn events(&self) -> Result<Vec<Schema>> {
        self.backend.all_schemas()
    }

    pub fn transforms(&self) -> Vec<String> {
        self.backend.transforms()
    }
}
