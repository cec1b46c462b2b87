// ./infrastructure/src/persistence/file_repository.rs
use application::{ApplicationError, SchemaCodec, SchemaRepository};
use async_trait::async_trait;
use domain::SchemaSet;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, instrument};

/// Schema repository backed by a single file holding the whole mapping.
///
/// Every `load` reads the file in full and every `save` rewrites it in full,
/// through a sibling temp file renamed over the store so a reader never sees
/// a partial write. A missing file is an empty store; a file that doesn't decode is reported
/// as [`ApplicationError::CorruptStore`] and left untouched.
#[derive(Clone)]
pub struct FileSchemaRepository {
    path: PathBuf,
    codec: Arc<dyn SchemaCodec>,
}

impl FileSchemaRepository {
    pub fn new(path: impl Into<PathBuf>, codec: Arc<dyn SchemaCodec>) -> Self {
        Self {
            path: path.into(),
            codec,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(OsString::from).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SchemaRepository for FileSchemaRepository {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<SchemaSet, ApplicationError> {
        match fs::read(&self.path).await {
            Ok(bytes) => {
                debug!(bytes = bytes.len(), "Read schema store file");
                self.codec.decode(&bytes).map_err(|source| {
                    error!("Schema store file could not be decoded: {}", source);
                    ApplicationError::CorruptStore {
                        path: self.path.display().to_string(),
                        source,
                    }
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Schema store file does not exist yet, starting empty");
                Ok(SchemaSet::new())
            }
            Err(e) => {
                error!("Failed to read schema store file: {}", e);
                Err(ApplicationError::InfrastructureError(format!(
                    "Failed to read '{}': {}",
                    self.path.display(),
                    e
                )))
            }
        }
    }

    #[instrument(skip(self, schemas), fields(path = %self.path.display(), count = schemas.len()))]
    async fn save(&self, schemas: &SchemaSet) -> Result<(), ApplicationError> {
        let bytes = self.codec.encode(schemas).map_err(|e| {
            error!("Failed to encode schema store: {}", e);
            ApplicationError::InfrastructureError(format!("Failed to encode schemas: {}", e))
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create schema store directory: {}", e);
                ApplicationError::InfrastructureError(format!(
                    "Failed to create '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let temp = self.temp_path();
        fs::write(&temp, &bytes).await.map_err(|e| {
            error!("Failed to write schema store temp file: {}", e);
            ApplicationError::InfrastructureError(format!(
                "Failed to write '{}': {}",
                temp.display(),
                e
            ))
        })?;
        fs::rename(&temp, &self.path).await.map_err(|e| {
            error!("Failed to replace schema store file: {}", e);
            ApplicationError::InfrastructureError(format!(
                "Failed to replace '{}': {}",
                self.path.display(),
                e
            ))
        })?;
        debug!(bytes = bytes.len(), "Schema store file written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsonSchemaCodec;
    use application::{CreateSchemaRequest, SchemaService};
    use serde_json::json;
    use tempfile::TempDir;

    fn repository(dir: &TempDir) -> FileSchemaRepository {
        FileSchemaRepository::new(dir.path().join("schemas.json"), Arc::new(JsonSchemaCodec))
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let schemas = repository(&dir).load().await.unwrap();
        assert!(schemas.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir);
        let schemas: SchemaSet = [
            ("flow".to_string(), json!({"nodes": [{"id": "n1", "value": null}], "scaling": 0.93})),
            ("flag".to_string(), json!(true)),
            ("nothing".to_string(), json!(null)),
        ]
        .into_iter()
        .collect();

        repo.save(&schemas).await.unwrap();
        assert_eq!(repo.load().await.unwrap(), schemas);
    }

    #[tokio::test]
    async fn save_overwrites_previous_content() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir);
        let first: SchemaSet = [("a".to_string(), json!(1))].into_iter().collect();
        let second: SchemaSet = [("b".to_string(), json!(2))].into_iter().collect();

        repo.save(&first).await.unwrap();
        repo.save(&second).await.unwrap();
        assert_eq!(repo.load().await.unwrap(), second);
        assert!(!repo.temp_path().exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reads_during_writes_see_a_whole_store() {
        let dir = TempDir::new().unwrap();
        let codec = Arc::new(JsonSchemaCodec);
        let service = Arc::new(SchemaService::new(
            Arc::new(repository(&dir)),
            codec,
        ));
        let big = json!({"nodes": vec!["payload"; 20_000]}).to_string();

        let writer = {
            let service = service.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    service
                        .create_schema(CreateSchemaRequest {
                            name: format!("s{i}"),
                            content: big.clone(),
                        })
                        .await
                        .unwrap();
                }
            })
        };
        let mut readers = Vec::new();
        for _ in 0..3 {
            let service = service.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..50 {
                    service.list_schemas().await.unwrap();
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(service.list_schemas().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn save_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store").join("schemas.json");
        let repo = FileSchemaRepository::new(&path, Arc::new(JsonSchemaCodec));

        repo.save(&SchemaSet::new()).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir);
        std::fs::write(repo.path(), b"{ not json").unwrap();

        let result = repo.load().await;
        assert!(matches!(result, Err(ApplicationError::CorruptStore { .. })));
    }
}
