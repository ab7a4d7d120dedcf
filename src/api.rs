//! HTTP surface for RustyDocs.
//!
//! The Axum router exposes a compact set of endpoints:
//!
//! - `POST /documents` – Multipart upload (`file`, optional `transactionId`, optional `metadata`
//!   JSON object). Returns `201` with `{ documentId, workflowId, status: "processing" }`.
//! - `GET /documents/:id` – Status and recorded processing results.
//! - `GET /documents/:id/download` – Stream the original file back.
//! - `GET /documents/:id/audit` – Audit record plus hash verification.
//! - `POST /search` – Scoped question answering over processed documents.
//! - `GET /health` – Backend reachability (`503` when any backend is down).
//! - `GET /metrics` – Pipeline counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools.

use crate::gateway::{
    AuditView, DocumentGateway, DocumentView, GatewayError, HealthReport, UploadReceipt,
    UploadRequest,
};
use crate::metrics::MetricsSnapshot;
use crate::rag::{QueryAnswer, QueryRequest};
use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Build the HTTP router over a shared gateway.
pub fn create_router(gateway: Arc<DocumentGateway>) -> Router {
    Router::new()
        .route("/documents", post(upload_document))
        .route("/documents/:id", get(get_document))
        .route("/documents/:id/download", get(download_document))
        .route("/documents/:id/audit", get(get_audit))
        .route("/search", post(search))
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .route("/commands", get(get_commands))
        // The gateway enforces its own limit while reading the file field.
        .layer(DefaultBodyLimit::disable())
        .with_state(gateway)
}

/// Accept a multipart upload and dispatch its workflow.
///
/// The `file` field is streamed into the gateway's bounded buffer, so an oversized file is
/// rejected with `413` before any record exists. Unknown fields are ignored.
async fn upload_document(
    State(gateway): State<Arc<DocumentGateway>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadReceipt>), AppError> {
    let mut request = UploadRequest::default();
    let mut staged = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                request.file_name = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| "upload.bin".to_string());
                request.content_type = field.content_type().map(str::to_string);
                staged = Some(gateway.stage_upload(field).await?);
            }
            "transactionId" => {
                request.transaction_id = Some(field.text().await.map_err(invalid_multipart)?);
            }
            "metadata" => {
                let raw = field.text().await.map_err(invalid_multipart)?;
                request.metadata = parse_metadata(&raw)?;
            }
            other => tracing::debug!(field = other, "Ignoring unknown upload field"),
        }
    }

    let Some(bytes) = staged else {
        return Err(GatewayError::Validation("multipart field `file` is required".into()).into());
    };
    let receipt = gateway.commit_upload(request, bytes).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

fn invalid_multipart(error: axum::extract::multipart::MultipartError) -> AppError {
    GatewayError::Validation(format!("invalid multipart body: {error}")).into()
}

fn parse_metadata(raw: &str) -> Result<Map<String, Value>, AppError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(GatewayError::Validation("metadata must be a JSON object".into()).into()),
        Err(error) => {
            Err(GatewayError::Validation(format!("metadata is not valid JSON: {error}")).into())
        }
    }
}

async fn get_document(
    State(gateway): State<Arc<DocumentGateway>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentView>, AppError> {
    Ok(Json(gateway.status(&id).await?))
}

/// Stream the stored file with its recorded content type and original name.
async fn download_document(
    State(gateway): State<Arc<DocumentGateway>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let download = gateway.download(&id).await?;
    let mut response = Body::from_stream(download.body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&download.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.size_bytes));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&download.file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn content_disposition(file_name: &str) -> String {
    let escaped: String = file_name
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if ch.is_ascii_graphic() || ch == ' ' => ch,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{escaped}\"")
}

async fn get_audit(
    State(gateway): State<Arc<DocumentGateway>>,
    Path(id): Path<String>,
) -> Result<Json<AuditView>, AppError> {
    Ok(Json(gateway.audit(&id).await?))
}

async fn search(
    State(gateway): State<Arc<DocumentGateway>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryAnswer>, AppError> {
    let Json(request) = payload.map_err(|error| {
        GatewayError::Validation(format!("invalid query body: {}", error.body_text()))
    })?;
    Ok(Json(gateway.search(&request).await?))
}

async fn get_health(State(gateway): State<Arc<DocumentGateway>>) -> (StatusCode, Json<HealthReport>) {
    let report = gateway.health().await;
    let status = if report.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn get_metrics(State(gateway): State<Arc<DocumentGateway>>) -> Json<MetricsSnapshot> {
    Json(gateway.metrics())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "upload",
                method: "POST",
                path: "/documents",
                description: "Upload a file as multipart form data (`file`, optional `transactionId` and `metadata`). Processing continues in the background; poll the status command.",
                request_example: Some(json!({
                    "file": "@loan-offer.pdf",
                    "transactionId": "tx-1",
                    "metadata": "{\"source\":\"email\"}"
                })),
            },
            CommandDescriptor {
                name: "status",
                method: "GET",
                path: "/documents/:id",
                description: "Return the document's status and the results recorded by each workflow step.",
                request_example: None,
            },
            CommandDescriptor {
                name: "download",
                method: "GET",
                path: "/documents/:id/download",
                description: "Stream the original upload back.",
                request_example: None,
            },
            CommandDescriptor {
                name: "audit",
                method: "GET",
                path: "/documents/:id/audit",
                description: "Return the tamper-evident audit record and whether its hash still verifies.",
                request_example: None,
            },
            CommandDescriptor {
                name: "search",
                method: "POST",
                path: "/search",
                description: "Answer a question from processed documents, optionally scoped to one transaction.",
                request_example: Some(json!({
                    "query": "What is the approved loan amount?",
                    "transactionId": "tx-1"
                })),
            },
            CommandDescriptor {
                name: "health",
                method: "GET",
                path: "/health",
                description: "Report whether storage and the vector index are reachable.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return upload, processing, and query counters.",
                request_example: None,
            },
        ],
    })
}

struct AppError(GatewayError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::QueryFailed(_) | GatewayError::Blob(_) | GatewayError::Metadata(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(inner: GatewayError) -> Self {
        Self(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::gateway::testing::{in_memory, wait_for_terminal};
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "rustydocs-test-boundary";

    struct Part<'a> {
        name: &'a str,
        file_name: Option<&'a str>,
        body: &'a [u8],
    }

    fn multipart_request(parts: &[Part<'_>]) -> Request<Body> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part.file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        part.name
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name)
                        .as_bytes(),
                ),
            }
            body.extend_from_slice(part.body);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/documents")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.expect("router response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        (status, body.to_vec())
    }

    fn json_body(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).expect("json body")
    }

    #[tokio::test]
    async fn commands_catalog_exposes_upload_endpoint() {
        let response = get_commands().await;
        let commands = response.0.commands;
        let upload = commands
            .iter()
            .find(|cmd| cmd.name == "upload")
            .expect("upload command present");

        assert_eq!(upload.method, "POST");
        assert_eq!(upload.path, "/documents");
        assert!(commands.iter().any(|cmd| cmd.path == "/search"));
    }

    #[tokio::test]
    async fn upload_then_status_download_and_audit() {
        let stack = in_memory(1024);
        let gateway = Arc::new(stack.gateway);
        let app = create_router(gateway.clone());

        let (status, body) = send(
            &app,
            multipart_request(&[
                Part {
                    name: "file",
                    file_name: Some("offer.txt"),
                    body: b"Approved loan amount is 250,000",
                },
                Part {
                    name: "transactionId",
                    file_name: None,
                    body: b"tx-1",
                },
                Part {
                    name: "metadata",
                    file_name: None,
                    body: br#"{"source":"email"}"#,
                },
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let receipt = json_body(&body);
        assert_eq!(receipt["status"], "processing");
        let id = receipt["documentId"].as_str().expect("id").to_string();

        wait_for_terminal(&gateway, &id).await;

        let (status, body) = send(&app, get(&format!("/documents/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        let view = json_body(&body);
        assert_eq!(view["status"], "processed");
        assert_eq!(view["transactionId"], "tx-1");
        assert_eq!(view["metadata"], json!({ "source": "email" }));
        assert_eq!(view["processingResults"]["searchIndexed"], true);

        let response = app
            .clone()
            .oneshot(get(&format!("/documents/{id}/download")))
            .await
            .expect("download");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain"
        );
        assert!(
            response.headers()[header::CONTENT_DISPOSITION]
                .to_str()
                .expect("header")
                .contains("offer.txt")
        );
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("bytes");
        assert_eq!(&bytes[..], b"Approved loan amount is 250,000");

        let (status, body) = send(&app, get(&format!("/documents/{id}/audit"))).await;
        assert_eq!(status, StatusCode::OK);
        let audit = json_body(&body);
        assert_eq!(audit["verified"], true);
        assert_eq!(audit["documentId"], id.as_str());
    }

    #[tokio::test]
    async fn oversized_upload_returns_413_without_record() {
        let stack = in_memory(16);
        let metadata = stack.metadata.clone();
        let app = create_router(Arc::new(stack.gateway));

        let (status, body) = send(
            &app,
            multipart_request(&[Part {
                name: "file",
                file_name: Some("big.txt"),
                body: &[b'x'; 64],
            }]),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(json_body(&body)["error"].as_str().expect("error").contains("16"));

        use crate::storage::MetadataStore;
        assert!(metadata.list_unfinished().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn upload_without_file_is_rejected() {
        let stack = in_memory(1024);
        let app = create_router(Arc::new(stack.gateway));

        let (status, _) = send(
            &app,
            multipart_request(&[Part {
                name: "transactionId",
                file_name: None,
                body: b"tx-1",
            }]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_object_metadata_is_rejected() {
        let stack = in_memory(1024);
        let app = create_router(Arc::new(stack.gateway));

        let (status, body) = send(
            &app,
            multipart_request(&[
                Part {
                    name: "metadata",
                    file_name: None,
                    body: b"[1,2]",
                },
                Part {
                    name: "file",
                    file_name: Some("a.txt"),
                    body: b"hello",
                },
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json_body(&body)["error"].as_str().expect("error").contains("metadata"));
    }

    #[tokio::test]
    async fn unknown_document_returns_404() {
        let stack = in_memory(1024);
        let app = create_router(Arc::new(stack.gateway));

        for uri in [
            "/documents/missing",
            "/documents/missing/download",
            "/documents/missing/audit",
        ] {
            let (status, body) = send(&app, get(uri)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert!(json_body(&body)["error"].is_string());
        }
    }

    #[tokio::test]
    async fn blank_search_is_a_bad_request() {
        let stack = in_memory(1024);
        let app = create_router(Arc::new(stack.gateway));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/search")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "query": "  " }).to_string()))
            .expect("request");
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_without_matches_returns_fixed_answer() {
        let stack = in_memory(1024);
        let app = create_router(Arc::new(stack.gateway));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/search")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "query": "approved amount", "transactionId": "tx-none" }).to_string(),
            ))
            .expect("request");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let answer = json_body(&body);
        assert_eq!(answer["sources"], json!([]));
        assert_eq!(answer["confidence"], 0.0);
    }

    #[tokio::test]
    async fn malformed_search_body_gets_json_error() {
        let stack = in_memory(1024);
        let app = create_router(Arc::new(stack.gateway));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/search")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"query\": "))
            .expect("request");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error = json_body(&body);
        assert!(
            error["error"]
                .as_str()
                .is_some_and(|message| message.contains("invalid query body"))
        );
    }

    #[tokio::test]
    async fn health_and_metrics_are_exposed() {
        let stack = in_memory(1024);
        let app = create_router(Arc::new(stack.gateway));

        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        let health = json_body(&body);
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["storageConnected"], true);

        let (status, body) = send(&app, get("/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["uploadsAccepted"], 0);
    }
}
