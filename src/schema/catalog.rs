//! # Schema Catalog
//!
//! Cache of database schemas fetched from the server, keyed by database
//! name. A cached schema is shared as `Arc<DatabaseSchema>` and never mutated;
//! [`SchemaCatalog::refresh`] swaps in a freshly fetched copy.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, info};

use super::DatabaseSchema;
use crate::protocol::{methods, OvsdbError, OvsdbResult, RpcTransport};

/// Per-connection schema cache.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    schemas: DashMap<String, Arc<DatabaseSchema>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        SchemaCatalog {
            schemas: DashMap::new(),
        }
    }

    /// Cached schema for `database`, if one has been fetched.
    pub fn cached(&self, database: &str) -> Option<Arc<DatabaseSchema>> {
        self.schemas.get(database).map(|s| Arc::clone(s.value()))
    }

    /// Cached schema, fetching it on first use.
    pub async fn get_or_fetch(
        &self,
        transport: &RpcTransport,
        database: &str,
    ) -> OvsdbResult<Arc<DatabaseSchema>> {
        if let Some(schema) = self.cached(database) {
            debug!(database, "schema_cache_hit");
            return Ok(schema);
        }
        self.refresh(transport, database).await
    }

    /// Fetch the schema again and replace the cached copy.
    pub async fn refresh(
        &self,
        transport: &RpcTransport,
        database: &str,
    ) -> OvsdbResult<Arc<DatabaseSchema>> {
        let schema = Arc::new(fetch_schema(transport, database).await?);
        info!(
            database,
            version = %schema.version,
            tables = schema.tables.len(),
            "schema_loaded"
        );
        self.schemas
            .insert(database.to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Insert a schema obtained elsewhere (for example parsed from a file).
    pub fn register(&self, schema: DatabaseSchema) -> Arc<DatabaseSchema> {
        let schema = Arc::new(schema);
        self.schemas
            .insert(schema.name.clone(), Arc::clone(&schema));
        schema
    }

    pub fn invalidate(&self, database: &str) -> bool {
        self.schemas.remove(database).is_some()
    }

    pub fn invalidate_all(&self) {
        self.schemas.clear();
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Issue `get_schema` and parse the result.
pub async fn fetch_schema(transport: &RpcTransport, database: &str) -> OvsdbResult<DatabaseSchema> {
    let result = transport
        .call(methods::GET_SCHEMA, json!([database]))
        .await?;
    let schema = DatabaseSchema::from_json(&result)?;
    if schema.name != database {
        return Err(OvsdbError::InvalidSchema {
            message: format!(
                "requested schema for '{database}' but server returned '{}'",
                schema.name
            ),
        });
    }
    Ok(schema)
}
