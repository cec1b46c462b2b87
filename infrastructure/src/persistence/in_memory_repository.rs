// ./infrastructure/src/persistence/in_memory_repository.rs
use application::{ApplicationError, SchemaRepository};
use async_trait::async_trait;
use dashmap::DashMap;
use domain::{SchemaDocument, SchemaSet};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Ephemeral schema repository. Contents vanish with the process.
#[derive(Debug, Clone, Default)]
pub struct InMemorySchemaRepository {
    // Schema Name -> Document
    schemas: Arc<DashMap<String, SchemaDocument>>,
}

impl InMemorySchemaRepository {
    pub fn new() -> Self {
        Self {
            schemas: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl SchemaRepository for InMemorySchemaRepository {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<SchemaSet, ApplicationError> {
        debug!(count = self.schemas.len(), "Loading schemas from in-memory store");
        Ok(self
            .schemas
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    #[instrument(skip(self, schemas), fields(count = schemas.len()))]
    async fn save(&self, schemas: &SchemaSet) -> Result<(), ApplicationError> {
        debug!("Replacing in-memory store contents");
        // Whole-mapping replace: drop what's gone, then upsert the rest
        self.schemas.retain(|name, _| schemas.contains(name));
        for (name, document) in schemas.iter() {
            self.schemas.insert(name.clone(), document.clone());
        }
        Ok(())
    }
}
