// ./api/src/lib.rs
use axum::{
    Json,
    Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json as JsonResponse, Response}, // Use JsonResponse for clarity
    routing::{get, post},
};
use axum_extra::extract::Multipart;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use application::{
    ApplicationError,
    // DTOs / Requests / Responses
    CreateSchemaRequest,
    ListSchemasResponse,
    MergeSource,
    SchemaContentsResponse,
    // Services
    SchemaService,
    SchemaSummary,
};

pub mod config;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub schema_service: Arc<SchemaService>,
}

/// Builds the HTTP surface over the schema store.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Schema Management Endpoints
        .route(
            "/schemas",
            get(list_schemas_handler).post(create_schema_handler),
        )
        .route("/schemas/export", get(export_schemas_handler))
        .route("/schemas/merge", post(merge_schemas_handler))
        .route("/schemas/merge/preview", post(preview_merge_handler))
        .route(
            "/schemas/:name",
            get(get_schema_handler).delete(delete_schema_handler),
        )
        .with_state(state)
}

// --- API Handlers ---

async fn health_check() -> impl IntoResponse {
    info!("Health check endpoint called");
    (StatusCode::OK, "OK")
}

#[derive(Deserialize, Debug, Default)]
struct ListQuery {
    /// Include every document in the listing.
    #[serde(default)]
    expand: bool,
}

/// Handler for listing schemas (GET /schemas[?expand=true]).
async fn list_schemas_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    info!(expand = query.expand, "Received request to list schemas");
    if query.expand {
        return match state.schema_service.list_schema_contents().await {
            Ok(schemas) => {
                let total = schemas.len();
                (
                    StatusCode::OK,
                    JsonResponse(SchemaContentsResponse { schemas, total }),
                )
                    .into_response()
            }
            Err(e) => {
                error!("Failed to list schema contents via handler: {}", e);
                map_application_error_to_response(e)
            }
        };
    }

    match state.schema_service.list_schemas().await {
        Ok(names) => {
            let response = ListSchemasResponse {
                total: names.len(),
                schemas: names
                    .into_iter()
                    .map(|name| SchemaSummary { name })
                    .collect(),
            };
            (StatusCode::OK, JsonResponse(response)).into_response()
        }
        Err(e) => {
            error!("Failed to list schemas via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for viewing one schema (GET /schemas/:name).
async fn get_schema_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    info!(schema = %name, "Received request to get schema");
    match state.schema_service.get_schema(&name).await {
        Ok(schema) => (StatusCode::OK, JsonResponse(schema)).into_response(),
        Err(e) => {
            error!(schema = %name, "Failed to get schema via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for creating a schema (POST /schemas).
async fn create_schema_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateSchemaRequest>,
) -> Response {
    info!(schema = %payload.name, "Received request to create schema");
    match state.schema_service.create_schema(payload).await {
        Ok(schema) => {
            info!(schema = %schema.name, "Schema created successfully via handler");
            (StatusCode::CREATED, JsonResponse(schema)).into_response()
        }
        Err(e) => {
            error!("Failed to create schema via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for deleting a schema (DELETE /schemas/:name).
async fn delete_schema_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    info!(schema = %name, "Received request to delete schema");
    match state.schema_service.delete_schema(&name).await {
        Ok(()) => {
            info!(schema = %name, "Schema deleted successfully via handler");
            (StatusCode::NO_CONTENT, "").into_response()
        }
        Err(e) => {
            error!(schema = %name, "Failed to delete schema via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for planning a merge (POST /schemas/merge/preview, multipart `file` parts).
async fn preview_merge_handler(State(state): State<AppState>, multipart: Multipart) -> Response {
    info!("Received request to preview merge");
    let (sources, _) = match read_merge_form(multipart).await {
        Ok(form) => form,
        Err(e) => return map_application_error_to_response(e),
    };
    match state.schema_service.preview_merge(sources).await {
        Ok(preview) => (StatusCode::OK, JsonResponse(preview)).into_response(),
        Err(e) => {
            error!("Failed to preview merge via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for merging uploaded stores (POST /schemas/merge).
///
/// Multipart fields: one or more `file` parts, plus an optional `renames` part
/// holding a JSON object of candidate index -> target name.
async fn merge_schemas_handler(State(state): State<AppState>, multipart: Multipart) -> Response {
    info!("Received request to merge schemas");
    let (sources, renames) = match read_merge_form(multipart).await {
        Ok(form) => form,
        Err(e) => return map_application_error_to_response(e),
    };
    let source_count = sources.len();
    match state.schema_service.merge_sources(sources, renames).await {
        Ok(report) => {
            if !report.warnings.is_empty() {
                warn!(
                    sources = source_count,
                    warnings = report.warnings.len(),
                    "Merge completed with warnings"
                );
            }
            info!(merged = report.merged.len(), "Merge completed via handler");
            (StatusCode::OK, JsonResponse(report)).into_response()
        }
        Err(e) => {
            error!("Failed to merge schemas via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for downloading the whole store (GET /schemas/export).
async fn export_schemas_handler(State(state): State<AppState>) -> Response {
    info!("Received request to export schemas");
    match state.schema_service.export().await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (
                    header::CONTENT_TYPE,
                    state.schema_service.export_content_type(),
                ),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"schemas.json\"",
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to export schemas via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Collects uploaded files as in-memory buffers, dropped when the request ends.
async fn read_merge_form(
    mut multipart: Multipart,
) -> Result<(Vec<MergeSource>, HashMap<usize, String>), ApplicationError> {
    let mut sources = Vec::new();
    let mut renames = HashMap::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApplicationError::InvalidInput(format!("Failed to parse multipart form: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" | "files" => {
                let label = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("upload #{}", sources.len() + 1));
                let bytes = field.bytes().await.map_err(|e| {
                    ApplicationError::InvalidInput(format!(
                        "Failed to read uploaded file '{}': {}",
                        label, e
                    ))
                })?;
                sources.push(MergeSource {
                    label,
                    bytes: bytes.to_vec(),
                });
            }
            "renames" => {
                let text = field.text().await.map_err(|e| {
                    ApplicationError::InvalidInput(format!("Failed to read renames field: {}", e))
                })?;
                if !text.trim().is_empty() {
                    renames = serde_json::from_str(&text).map_err(|e| {
                        ApplicationError::InvalidInput(format!(
                            "Field 'renames' must be a JSON object of candidate index to name: {}",
                            e
                        ))
                    })?;
                }
            }
            _ => {
                warn!("Unknown field in multipart: {}", name);
            }
        }
    }
    Ok((sources, renames))
}

/// Helper function to map ApplicationError enum to HTTP status codes and response body.
fn map_application_error_to_response(err: ApplicationError) -> Response {
    let (status, message) = match err {
        ApplicationError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        e @ ApplicationError::InvalidJson(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        ApplicationError::NotFound(name) => (
            StatusCode::NOT_FOUND,
            format!("Schema '{}' not found", name),
        ),
        ApplicationError::DuplicateName(name) => (
            StatusCode::CONFLICT,
            format!("Schema '{}' already exists. Choose another name.", name),
        ),
        ApplicationError::MergeConflict(msg) => (StatusCode::CONFLICT, msg),
        ApplicationError::CorruptStore { path, source } => {
            error!(path = %path, "Schema store is corrupt: {}", source);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Schema store '{}' is corrupt and was left untouched", path),
            )
        }
        ApplicationError::InfrastructureError(msg) => {
            error!("Underlying infrastructure error: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred".to_string(),
            )
        }
    };
    (status, JsonResponse(json!({ "error": message }))).into_response()
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use infrastructure::{FileSchemaRepository, InMemorySchemaRepository, JsonSchemaCodec};
    use serde_json::Value;
    use tower::ServiceExt;

    const BOUNDARY: &str = "schema-store-test-boundary";

    fn memory_app() -> Router {
        let service = SchemaService::new(
            Arc::new(InMemorySchemaRepository::new()),
            Arc::new(JsonSchemaCodec),
        );
        build_router(AppState {
            schema_service: Arc::new(service),
        })
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn create_request(name: &str, content: &str) -> Request<Body> {
        let body = json!({ "name": name, "content": content }).to_string();
        Request::post("/schemas")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn multipart_request(uri: &str, files: &[(&str, &str)], renames: Option<&str>) -> Request<Body> {
        let mut body = Vec::new();
        for (file_name, content) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(content.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        if let Some(renames) = renames {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"renames\"\r\n\r\n{renames}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn create_list_view_delete() {
        let app = memory_app();

        let (status, body) = send(&app, create_request("flow", r#"{"nodes": []}"#)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({"name": "flow", "document": {"nodes": []}}));

        let (status, body) = send(&app, get("/schemas")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"schemas": [{"name": "flow"}], "total": 1}));

        let (status, body) = send(&app, get("/schemas?expand=true")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["schemas"][0]["document"], json!({"nodes": []}));

        let (status, body) = send(&app, get("/schemas/flow")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["document"], json!({"nodes": []}));

        let delete = Request::delete("/schemas/flow").body(Body::empty()).unwrap();
        let (status, _) = send(&app, delete).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&app, get("/schemas/flow")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("flow"));
    }

    #[tokio::test]
    async fn create_errors_map_to_status_codes() {
        let app = memory_app();
        send(&app, create_request("A", "{}")).await;

        let (status, _) = send(&app, create_request("A", "{}")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, create_request("C", "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not valid JSON"));

        let (status, _) = send(&app, create_request("", "{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_absent_is_404() {
        let app = memory_app();
        let delete = Request::delete("/schemas/Z").body(Body::empty()).unwrap();
        let (status, _) = send(&app, delete).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn merge_preview_then_commit_with_rename() {
        let app = memory_app();
        send(&app, create_request("X", "1")).await;
        let files = [("a.json", r#"{"X": 2, "Y": 3}"#)];

        let (status, preview) = send(&app, multipart_request("/schemas/merge/preview", &files, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(preview["conflicts"], json!(1));
        assert_eq!(preview["candidates"][0]["name"], json!("X"));
        assert_eq!(preview["candidates"][0]["suggested_name"], json!("X_merged"));
        assert_eq!(preview["candidates"][0]["source"], json!("a.json"));

        let (status, report) = send(
            &app,
            multipart_request("/schemas/merge", &files, Some(r#"{"0": "X_from_a"}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["total_schemas"], json!(3));

        let (_, body) = send(&app, get("/schemas")).await;
        assert_eq!(
            body["schemas"],
            json!([{"name": "X"}, {"name": "X_from_a"}, {"name": "Y"}])
        );
    }

    #[tokio::test]
    async fn merge_reports_bad_sources_as_warnings() {
        let app = memory_app();
        let files = [("broken.pkl", "\u{80}\u{4}garbage"), ("good.json", r#"{"Y": 2}"#)];

        let (status, report) = send(&app, multipart_request("/schemas/merge", &files, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["warnings"][0]["source"], json!("broken.pkl"));
        assert_eq!(report["merged"][0]["stored_as"], json!("Y"));
    }

    #[tokio::test]
    async fn merge_without_files_is_400() {
        let app = memory_app();
        let (status, _) = send(&app, multipart_request("/schemas/merge", &[], None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn merge_colliding_rename_is_409() {
        let app = memory_app();
        send(&app, create_request("X", "1")).await;
        send(&app, create_request("W", "0")).await;
        let files = [("a.json", r#"{"X": 2}"#)];

        let (status, _) = send(&app, multipart_request("/schemas/merge", &files, Some(r#"{"0": "W"}"#))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn export_is_a_valid_merge_source() {
        let app = memory_app();
        send(&app, create_request("graph", r#"{"connections": [], "value": null}"#)).await;

        let response = app.clone().oneshot(get("/schemas/export")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let exported = String::from_utf8(bytes.to_vec()).unwrap();

        let other = memory_app();
        let files = [("schemas.json", exported.as_str())];
        let (status, _) = send(&other, multipart_request("/schemas/merge", &files, None)).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&other, get("/schemas/graph")).await;
        assert_eq!(body["document"], json!({"connections": [], "value": null}));
    }

    #[tokio::test]
    async fn corrupt_store_file_is_500_and_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("schemas.json");
        std::fs::write(&path, b"{ corrupt").unwrap();
        let codec = Arc::new(JsonSchemaCodec);
        let service = SchemaService::new(
            Arc::new(FileSchemaRepository::new(&path, codec.clone())),
            codec,
        );
        let app = build_router(AppState {
            schema_service: Arc::new(service),
        });

        let (status, _) = send(&app, create_request("A", "{}")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let (status, _) = send(&app, get("/schemas")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(std::fs::read(&path).unwrap(), b"{ corrupt".to_vec());
    }

    #[tokio::test]
    async fn health() {
        let app = memory_app();
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
