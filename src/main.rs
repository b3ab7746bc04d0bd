//! Receipt Chef - receipt photo to structured data and recipe ideas.

mod config;
mod error;
mod food;
mod google_auth;
mod json_repair;
mod llm;
mod ocr;
mod pipeline;
mod preprocess;
mod receipt;
mod recipes;
mod structuring;
#[cfg(test)]
mod testing;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use config::AppConfig;
use error::PipelineError;
use pipeline::Pipeline;
use preprocess::RawImage;
use receipt::ReceiptRecord;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "receipt_chef=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    info!(
        "OCR backend: {}, language model: {} ({})",
        config.ocr.kind().as_str(),
        config.llm.provider.as_str(),
        config.llm.model
    );
    if let Some(dir) = &config.diagnostics_dir {
        info!("Saving preprocessed images to {:?}", dir);
    }

    let pipeline = Pipeline::from_config(&config)?;
    info!(
        "Pipeline ready: extractor={}, model={}",
        pipeline.extractor_name(),
        pipeline.model_name()
    );

    let state = AppState {
        pipeline: Arc::new(pipeline),
    };
    let app = app(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn app(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/process-receipt", post(process_receipt))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    text_extractor: String,
    language_model: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        text_extractor: state.pipeline.extractor_name().to_string(),
        language_model: state.pipeline.model_name().to_string(),
    })
}

#[derive(Serialize)]
struct ProcessResponse {
    success: bool,
    processed_data: ReceiptRecord,
}

/// Upload a receipt photo and run it through the pipeline.
async fn process_receipt(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ProcessResponse>, ApiError> {
    let image = read_upload(multipart).await?;
    info!("Received file: {} ({} bytes)", image.filename, image.bytes.len());

    let record = state.pipeline.process(image).await?;

    Ok(Json(ProcessResponse {
        success: true,
        processed_data: record,
    }))
}

/// Pull the `file` field out of the form and validate it.
async fn read_upload(mut multipart: Multipart) -> Result<RawImage, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(ApiError::multipart)? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().trim().to_string();
        if filename.is_empty() {
            return Err(ApiError::bad_request("No file selected"));
        }
        if !has_allowed_extension(&filename) {
            return Err(ApiError::bad_request("Invalid file type"));
        }

        let bytes = field.bytes().await.map_err(ApiError::multipart)?;
        if bytes.is_empty() {
            return Err(ApiError::bad_request("Uploaded file is empty"));
        }
        return Ok(RawImage::new(filename, bytes.to_vec()));
    }

    Err(ApiError::bad_request("No file uploaded"))
}

fn has_allowed_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

// ============================================================================
// Error responses
// ============================================================================

/// JSON `{error}` body with a status code.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }

    fn multipart(err: MultipartError) -> Self {
        warn!("Multipart error: {}", err);
        Self {
            status: err.status(),
            message: format!("Multipart error: {}", err.body_text()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        error!("Receipt processing failed at {}: {}", err.stage(), err);
        Self {
            status: err.status_code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::food::{FoodClassifier, FoodItemPolicy};
    use crate::testing::{receipt_png, FailingModel, FixedTextExtractor, ScriptedModel};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    const BOUNDARY: &str = "receipt-chef-boundary";

    const MART_TEXT: &str =
        "MART\nApple $1.20\nBread $2.50\nSubtotal $3.70\nTax $0.30\nTotal $4.00";

    const MART_RESPONSE: &str = r#"{"merchant": "MART", "datetime": "2024-05-01 10:15",
        "items": [{"name": "Apple", "price": "$1.20", "is_food": true},
                  {"name": "Bread", "price": "$2.50", "is_food": true}],
        "subtotal": "$3.70", "tax": "$0.30", "total": "$4.00",
        "food_items": ["Apple", "Bread"]}"#;

    const RECIPES_RESPONSE: &str = r#"{"recipes": [
        {"name": "Apple Toast", "additional_ingredients": ["butter"],
         "instructions": ["Toast bread.", "Add apple."], "cooking_time": "10 minutes", "difficulty": "Easy"}
    ]}"#;

    fn test_app(text: &str, responses: Vec<&str>, limit: usize) -> Router {
        let pipeline = Pipeline::new(
            Arc::new(FixedTextExtractor {
                text: text.to_string(),
            }),
            Arc::new(ScriptedModel::new(responses)),
            FoodClassifier::new(FoodItemPolicy::ItemFlag).unwrap(),
            None,
        );
        app(
            AppState {
                pipeline: Arc::new(pipeline),
            },
            limit,
        )
    }

    fn upload_request(field: &str, filename: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/process-receipt")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_backends() {
        let app = test_app(MART_TEXT, vec![], 1024 * 1024);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["text_extractor"], "fixed");
        assert_eq!(body["language_model"], "scripted");
    }

    #[tokio::test]
    async fn test_process_receipt_success() {
        let app = test_app(MART_TEXT, vec![MART_RESPONSE, RECIPES_RESPONSE], 1024 * 1024);
        let (status, body) = send(app, upload_request("file", "receipt.PNG", &receipt_png())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let data = &body["processed_data"];
        assert_eq!(data["merchant"], "MART");
        assert_eq!(data["total"], "$4.00");
        assert_eq!(data["food_items"], serde_json::json!(["Apple", "Bread"]));
        assert_eq!(data["recipe_suggestions"][0]["name"], "Apple Toast");
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let png = receipt_png();
        let cases = [
            upload_request("file", "receipt.gif", &png),
            upload_request("file", "", &png),
            upload_request("file", "receipt.jpg", b""),
            upload_request("photo", "receipt.jpg", &png),
        ];

        for request in cases {
            let app = test_app(MART_TEXT, vec![], 1024 * 1024);
            let (status, body) = send(app, request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_undecodable_image_is_bad_request() {
        let app = test_app(MART_TEXT, vec![], 1024 * 1024);
        let (status, body) = send(app, upload_request("file", "receipt.jpg", b"not an image")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_no_text_is_unprocessable() {
        let app = test_app("", vec![], 1024 * 1024);
        let (status, body) = send(app, upload_request("file", "receipt.png", &receipt_png())).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("No text found"));
    }

    #[tokio::test]
    async fn test_backend_outage_is_service_unavailable() {
        let pipeline = Pipeline::new(
            Arc::new(FixedTextExtractor {
                text: MART_TEXT.to_string(),
            }),
            Arc::new(FailingModel),
            FoodClassifier::new(FoodItemPolicy::ItemFlag).unwrap(),
            None,
        );
        let app = app(
            AppState {
                pipeline: Arc::new(pipeline),
            },
            1024 * 1024,
        );
        let (status, body) = send(app, upload_request("file", "receipt.png", &receipt_png())).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("structuring"));
    }

    #[tokio::test]
    async fn test_oversized_upload_is_json_error() {
        let app = test_app(MART_TEXT, vec![], 256);
        let big = vec![0u8; 4096];
        let (status, body) = send(app, upload_request("file", "receipt.png", &big)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"].is_string());
    }

    #[test]
    fn test_extension_check() {
        assert!(has_allowed_extension("receipt.JPG"));
        assert!(has_allowed_extension("scan.final.jpeg"));
        assert!(!has_allowed_extension("receipt"));
        assert!(!has_allowed_extension("receipt.pdf"));
    }
}
