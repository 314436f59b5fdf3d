//! UpstageClient tests against a local stand-in for the Upstage API

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use snapsheet_ai::models::ImageFile;
use snapsheet_ai::services::{ExtractionError, ExtractionService, UpstageClient};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Recorded {
    requests: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
}

impl Recorded {
    fn record(&self, path: &str, headers: &HeaderMap, body: Value) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.requests
            .lock()
            .unwrap()
            .push((path.to_string(), auth, body));
    }

    fn last(&self) -> (String, Option<String>, Value) {
        self.requests.lock().unwrap().last().cloned().expect("a request")
    }
}

fn chat_reply(content: &str) -> Json<Value> {
    Json(json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] }))
}

async fn schema_generation(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    recorded.record("schema-generation", &headers, body);
    let schema = json!({
        "type": "json_schema",
        "json_schema": {
            "name": "document_schema",
            "schema": {
                "type": "object",
                "properties": {
                    "vendor_name": { "type": "string", "description": "Vendor Name" },
                    "total_amount": { "type": "number" },
                    "vendor": { "type": "string", "description": "Vendor Name" }
                }
            }
        }
    });
    chat_reply(&schema.to_string())
}

async fn information_extraction(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    recorded.record("information-extraction", &headers, body);
    chat_reply(r#"{"vendor_name": "ACME", "total_amount": 12.5, "unused": "x"}"#)
}

async fn chat_completions(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    recorded.record("chat/completions", &headers, body);
    chat_reply("\"Title: Vendor Invoices\"")
}

async fn failing() -> (StatusCode, &'static str) {
    (StatusCode::SERVICE_UNAVAILABLE, "overloaded")
}

/// Serve `router` on an ephemeral port; returns the base URL
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}/v1", addr)
}

async fn fake_upstage() -> (UpstageClient, Recorded) {
    let recorded = Recorded::default();
    let router = Router::new()
        .route(
            "/v1/information-extraction/schema-generation",
            post(schema_generation),
        )
        .route("/v1/information-extraction", post(information_extraction))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(recorded.clone());

    let base_url = serve(router).await;
    let client = UpstageClient::new("test-key", base_url, 50, Duration::from_secs(5)).unwrap();
    (client, recorded)
}

fn image() -> ImageFile {
    ImageFile::new("invoice.png", b"fake".to_vec())
}

#[tokio::test]
async fn test_infer_schema_maps_properties_to_display_names() {
    let (client, recorded) = fake_upstage().await;

    let schema = client.infer_schema(&image()).await.unwrap();

    assert_eq!(schema.field_names, vec!["Vendor Name", "Total Amount"]);

    let (path, auth, body) = recorded.last();
    assert_eq!(path, "schema-generation");
    assert_eq!(auth.as_deref(), Some("Bearer test-key"));
    assert_eq!(body["model"], "information-extract");
    let url = body["messages"][0]["content"][0]["image_url"]["url"]
        .as_str()
        .unwrap();
    assert_eq!(url, "data:image/png;base64,ZmFrZQ==");
}

#[tokio::test]
async fn test_extract_values_keys_results_by_display_name() {
    let (client, recorded) = fake_upstage().await;
    let names = vec!["Vendor Name".to_string(), "Total Amount".to_string(), "Date".to_string()];

    let values = client.extract_values(&image(), &names).await.unwrap();

    assert_eq!(values.len(), 3);
    assert_eq!(values["Vendor Name"], "ACME");
    assert_eq!(values["Total Amount"], "12.5");
    assert_eq!(values["Date"], "");

    let (path, _, body) = recorded.last();
    assert_eq!(path, "information-extraction");
    let properties = &body["response_format"]["json_schema"]["schema"]["properties"];
    assert_eq!(properties["vendor_name"]["description"], "Vendor Name");
    assert_eq!(properties["total_amount"]["type"], "string");
    assert_eq!(body["chunking"]["pages_per_chunk"], 5);
}

#[tokio::test]
async fn test_suggest_title_cleans_reply() {
    let (client, recorded) = fake_upstage().await;

    let title = client
        .suggest_title(&["Vendor Name".to_string()])
        .await
        .unwrap();

    assert_eq!(title, "Vendor Invoices");
    let (path, _, body) = recorded.last();
    assert_eq!(path, "chat/completions");
    assert_eq!(body["model"], "solar-mini");
    assert!(body["messages"][0]["content"]
        .as_str()
        .unwrap()
        .contains("- Vendor Name"));
}

#[tokio::test]
async fn test_empty_inputs_are_rejected_without_a_request() {
    let (client, recorded) = fake_upstage().await;

    assert!(matches!(
        client.extract_values(&image(), &[]).await,
        Err(ExtractionError::InvalidInput(_))
    ));
    assert!(matches!(
        client.suggest_title(&[]).await,
        Err(ExtractionError::InvalidInput(_))
    ));
    assert!(recorded.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_error_status_is_unavailable() {
    let router = Router::new().route(
        "/v1/information-extraction/schema-generation",
        post(failing),
    );
    let base_url = serve(router).await;
    let client = UpstageClient::new("k", base_url, 50, Duration::from_secs(5)).unwrap();

    match client.infer_schema(&image()).await {
        Err(ExtractionError::Unavailable { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "overloaded");
        }
        other => panic!("expected Unavailable, got {:?}", other.map(|s| s.field_names)),
    }
}

#[tokio::test]
async fn test_unreachable_service_is_network_error() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = UpstageClient::new(
        "k",
        format!("http://{}/v1", addr),
        50,
        Duration::from_secs(2),
    )
    .unwrap();

    assert!(matches!(
        client.infer_schema(&image()).await,
        Err(ExtractionError::Network(_))
    ));
}
