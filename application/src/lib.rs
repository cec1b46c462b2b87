use async_trait::async_trait;
use domain::{
    DomainError, MergedEntry, SchemaDocument, SchemaName, SchemaSet, apply_merge,
    resolve_conflicts,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

/// Error produced by a [`SchemaCodec`] when bytes are not a valid serialized mapping.
pub type CodecError = Box<dyn std::error::Error + Send + Sync>;

// --- Application Errors ---
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Schema already exists: {0}")]
    DuplicateName(String),
    #[error("Schema not found: {0}")]
    NotFound(String),
    #[error("Schema content is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Schema store at '{path}' is corrupt: {source}")]
    CorruptStore { path: String, source: CodecError },
    #[error("Merge rejected: {0}")]
    MergeConflict(String),
    #[error("Infrastructure error: {0}")]
    InfrastructureError(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<DomainError> for ApplicationError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::DuplicateName(name) => Self::DuplicateName(name),
            DomainError::NotFound(name) => Self::NotFound(name),
            DomainError::InvalidName(msg) => Self::InvalidInput(msg),
            e @ DomainError::MergeCollision(_) => Self::MergeConflict(e.to_string()),
            e @ DomainError::UnknownCandidate(_) => Self::InvalidInput(e.to_string()),
        }
    }
}

// --- Infrastructure Interfaces (Traits) ---

/// Interface for the persisted name -> document mapping.
///
/// The store is always read and written whole; there are no per-entry operations.
#[async_trait]
pub trait SchemaRepository: Send + Sync {
    /// Loads the full mapping. A store that has never been saved is empty.
    async fn load(&self) -> Result<SchemaSet, ApplicationError>;
    /// Overwrites the persisted mapping.
    async fn save(&self, schemas: &SchemaSet) -> Result<(), ApplicationError>;
}

/// Serialized form of a mapping, shared by the backing store and merge sources.
pub trait SchemaCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<SchemaSet, CodecError>;
    fn encode(&self, schemas: &SchemaSet) -> Result<Vec<u8>, CodecError>;
    /// MIME type of the encoded form.
    fn content_type(&self) -> &'static str;
}

// --- Request/Response Models (Data Transfer Objects - DTOs) ---

/// Request to create a schema. `content` is the raw JSON text as typed by the user.
#[derive(Deserialize, Debug)]
pub struct CreateSchemaRequest {
    pub name: String,
    pub content: String,
}

#[derive(Serialize, Debug)]
pub struct SchemaSummary {
    pub name: String,
}

#[derive(Serialize, Debug)]
pub struct ListSchemasResponse {
    pub schemas: Vec<SchemaSummary>,
    pub total: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SchemaResponse {
    pub name: String,
    pub document: SchemaDocument,
}

#[derive(Serialize, Debug)]
pub struct SchemaContentsResponse {
    pub schemas: Vec<SchemaResponse>,
    pub total: usize,
}

/// One uploaded blob to merge, tagged with a label (usually the file name) for reporting.
#[derive(Debug, Clone)]
pub struct MergeSource {
    pub label: String,
    pub bytes: Vec<u8>,
}

/// A merge source that could not be used, fully or in part.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SourceWarning {
    pub source: String,
    pub reason: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MergeCandidateView {
    /// Position in the plan; overrides are keyed by it.
    pub index: usize,
    pub source: String,
    pub name: String,
    pub conflict: bool,
    pub suggested_name: String,
}

#[derive(Serialize, Debug)]
pub struct MergePreview {
    pub candidates: Vec<MergeCandidateView>,
    pub conflicts: usize,
    pub warnings: Vec<SourceWarning>,
}

#[derive(Serialize, Debug)]
pub struct MergeReport {
    pub merged: Vec<MergedEntry>,
    pub warnings: Vec<SourceWarning>,
    /// Number of schemas in the store after the merge.
    pub total_schemas: usize,
}

// --- Application Services (Use Cases) ---

/// Service implementing every operation on the schema store.
pub struct SchemaService {
    schema_repo: Arc<dyn SchemaRepository>,
    codec: Arc<dyn SchemaCodec>,
    // Writers hold it across load-modify-save; readers hold it across load
    store_lock: RwLock<()>,
}

impl SchemaService {
    pub fn new(schema_repo: Arc<dyn SchemaRepository>, codec: Arc<dyn SchemaCodec>) -> Self {
        Self {
            schema_repo,
            codec,
            store_lock: RwLock::new(()),
        }
    }

    #[instrument(skip(self))]
    pub async fn list_schemas(&self) -> Result<Vec<String>, ApplicationError> {
        info!("Attempting to list all schemas");
        let _guard = self.store_lock.read().await;
        let schemas = self.schema_repo.load().await?;
        Ok(schemas.names())
    }

    /// Every schema with its document, in listing order.
    #[instrument(skip(self))]
    pub async fn list_schema_contents(&self) -> Result<Vec<SchemaResponse>, ApplicationError> {
        info!("Attempting to list all schemas with contents");
        let _guard = self.store_lock.read().await;
        let schemas = self.schema_repo.load().await?;
        Ok(schemas
            .iter()
            .map(|(name, document)| SchemaResponse {
                name: name.clone(),
                document: document.clone(),
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn get_schema(&self, name: &str) -> Result<SchemaResponse, ApplicationError> {
        info!(schema = %name, "Attempting to retrieve schema");
        let _guard = self.store_lock.read().await;
        let schemas = self.schema_repo.load().await?;
        schemas
            .get(name)
            .map(|document| SchemaResponse {
                name: name.to_string(),
                document: document.clone(),
            })
            .ok_or_else(|| {
                warn!(schema = %name, "Schema not found");
                ApplicationError::NotFound(name.to_string())
            })
    }

    #[instrument(skip(self, request), fields(schema = %request.name))]
    pub async fn create_schema(
        &self,
        request: CreateSchemaRequest,
    ) -> Result<SchemaResponse, ApplicationError> {
        info!("Attempting to create schema");

        let name = SchemaName::parse(&request.name)?;

        let _guard = self.store_lock.write().await;
        let mut schemas = self.schema_repo.load().await?;
        if schemas.contains(name.as_str()) {
            warn!(schema = %name.as_str(), "Creation failed: schema already exists");
            return Err(ApplicationError::DuplicateName(name.into()));
        }
        if request.content.trim().is_empty() {
            return Err(ApplicationError::InvalidInput(
                "Schema content must not be empty".to_string(),
            ));
        }

        let document: SchemaDocument = serde_json::from_str(&request.content).map_err(|e| {
            warn!(schema = %name.as_str(), "Creation failed: content is not valid JSON: {}", e);
            ApplicationError::InvalidJson(e)
        })?;

        schemas.insert_new(name.clone(), document.clone())?;
        self.schema_repo.save(&schemas).await?;
        info!(schema = %name.as_str(), total = schemas.len(), "Schema created successfully");

        Ok(SchemaResponse {
            name: name.into(),
            document,
        })
    }

    #[instrument(skip(self))]
    pub async fn delete_schema(&self, name: &str) -> Result<(), ApplicationError> {
        info!(schema = %name, "Attempting to delete schema");

        let _guard = self.store_lock.write().await;
        let mut schemas = self.schema_repo.load().await?;
        schemas.remove(name).map_err(|e| {
            warn!(schema = %name, "Deletion failed: schema not found");
            ApplicationError::from(e)
        })?;
        self.schema_repo.save(&schemas).await?;
        info!(schema = %name, "Schema deleted successfully");
        Ok(())
    }

    /// Plans a merge without writing anything. The returned candidate indices
    /// are stable for the same sources against the same store.
    #[instrument(skip(self, sources), fields(sources = sources.len()))]
    pub async fn preview_merge(
        &self,
        sources: Vec<MergeSource>,
    ) -> Result<MergePreview, ApplicationError> {
        info!("Attempting to preview merge");
        ensure_sources(&sources)?;
        let (labels, sets, warnings) = self.decode_sources(sources);

        let schemas = {
            let _guard = self.store_lock.read().await;
            self.schema_repo.load().await?
        };
        let candidates: Vec<MergeCandidateView> = resolve_conflicts(&schemas, &sets)
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| MergeCandidateView {
                index,
                source: labels[candidate.source].clone(),
                name: candidate.name,
                conflict: candidate.conflict,
                suggested_name: candidate.suggested_name,
            })
            .collect();
        let conflicts = candidates.iter().filter(|c| c.conflict).count();
        debug!(candidates = candidates.len(), conflicts, "Merge plan built");

        Ok(MergePreview {
            candidates,
            conflicts,
            warnings,
        })
    }

    /// Merges every readable source into the store and saves once.
    ///
    /// Unreadable sources are reported as warnings and skipped. `renames` maps
    /// candidate indices (as returned by [`Self::preview_merge`]) to the names
    /// the entries should be stored under.
    #[instrument(skip(self, sources, renames), fields(sources = sources.len(), renames = renames.len()))]
    pub async fn merge_sources(
        &self,
        sources: Vec<MergeSource>,
        renames: HashMap<usize, String>,
    ) -> Result<MergeReport, ApplicationError> {
        info!("Attempting to merge schema sources");
        ensure_sources(&sources)?;
        let (_, sets, warnings) = self.decode_sources(sources);

        let _guard = self.store_lock.write().await;
        let mut schemas = self.schema_repo.load().await?;
        let candidates = resolve_conflicts(&schemas, &sets);
        let merged = apply_merge(&mut schemas, candidates, &renames).map_err(|e| {
            warn!("Merge rejected: {}", e);
            ApplicationError::from(e)
        })?;

        self.schema_repo.save(&schemas).await?;
        let renamed = merged.iter().filter(|entry| entry.renamed).count();
        info!(
            merged = merged.len(),
            renamed,
            warnings = warnings.len(),
            total = schemas.len(),
            "Merge completed"
        );

        Ok(MergeReport {
            merged,
            warnings,
            total_schemas: schemas.len(),
        })
    }

    /// The whole store in its serialized form, usable as a merge source elsewhere.
    #[instrument(skip(self))]
    pub async fn export(&self) -> Result<Vec<u8>, ApplicationError> {
        info!("Exporting schema store");
        let _guard = self.store_lock.read().await;
        let schemas = self.schema_repo.load().await?;
        self.codec.encode(&schemas).map_err(|e| {
            error!("Failed to encode schema store for export: {}", e);
            ApplicationError::InfrastructureError(format!("Failed to encode schemas: {}", e))
        })
    }

    pub fn export_content_type(&self) -> &'static str {
        self.codec.content_type()
    }

    /// Decodes each source independently. A source that fails to decode is
    /// reported and dropped; the others are kept in their original order.
    fn decode_sources(
        &self,
        sources: Vec<MergeSource>,
    ) -> (Vec<String>, Vec<SchemaSet>, Vec<SourceWarning>) {
        let mut labels = Vec::with_capacity(sources.len());
        let mut sets = Vec::with_capacity(sources.len());
        let mut warnings = Vec::new();

        for source in sources {
            match self.codec.decode(&source.bytes) {
                Ok(mut schemas) => {
                    for blank in schemas.drop_blank_names() {
                        warn!(source = %source.label, "Skipping merge entry with blank name");
                        warnings.push(SourceWarning {
                            source: source.label.clone(),
                            reason: format!("Skipped entry with blank name {:?}", blank),
                        });
                    }
                    debug!(source = %source.label, entries = schemas.len(), "Merge source decoded");
                    labels.push(source.label);
                    sets.push(schemas);
                }
                Err(e) => {
                    warn!(source = %source.label, "Failed to decode merge source: {}", e);
                    warnings.push(SourceWarning {
                        source: source.label,
                        reason: format!("Not a valid schema store file: {}", e),
                    });
                }
            }
        }
        (labels, sets, warnings)
    }
}

fn ensure_sources(sources: &[MergeSource]) -> Result<(), ApplicationError> {
    if sources.is_empty() {
        return Err(ApplicationError::InvalidInput(
            "At least one file is required to merge".to_string(),
        ));
    }
    Ok(())
}
