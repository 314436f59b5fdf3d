//! Upstage information-extraction client
//!
//! Three calls, all chat-completion shaped:
//! - schema generation: image → `json_schema.schema.properties`
//! - information extraction: image + schema → api key → value
//! - chat completion (solar-mini): field names → dataset title
//!
//! Outbound calls share one governor token bucket.

use super::extraction_client::{ExtractionError, ExtractionService, InferredSchema};
use crate::models::ImageFile;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.upstage.ai/v1";

/// Title used when the model returns nothing usable
pub const FALLBACK_TITLE: &str = "AI Extracted Data";

const EXTRACTION_MODEL: &str = "information-extract";
const TITLE_MODEL: &str = "solar-mini";
const PAGES_PER_CHUNK: u32 = 5;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Upstage API client
pub struct UpstageClient {
    client: Client,
    base_url: String,
    api_key: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl UpstageClient {
    /// Create a client
    ///
    /// # Arguments
    /// * `api_key` - Bearer token
    /// * `base_url` - API root, e.g. `https://api.upstage.ai/v1`
    /// * `requests_per_second` - Outbound throttle (0 is treated as 1)
    /// * `timeout` - Per-request timeout
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        requests_per_second: u32,
        timeout: Duration,
    ) -> Result<Self, ExtractionError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(per_second));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            rate_limiter,
        })
    }

    /// POST a chat-shaped request and return `choices[0].message.content`
    async fn post_chat(&self, path: &str, body: &Value) -> Result<Option<String>, ExtractionError> {
        if self.rate_limiter.check().is_err() {
            tracing::debug!(path, "Rate limiting: waiting for permit");
            self.rate_limiter.until_ready().await;
        }

        let url = format!("{}/{}", self.base_url, path);
        tracing::debug!(url = %url, "Calling extraction API");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(url = %url, status = status.as_u16(), "Extraction API returned error status");
            return Err(ExtractionError::Unavailable {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Malformed(e.to_string()))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}

fn image_message(image: &ImageFile) -> Value {
    json!([{
        "role": "user",
        "content": [{
            "type": "image_url",
            "image_url": { "url": image.to_data_url() }
        }]
    }])
}

#[async_trait]
impl ExtractionService for UpstageClient {
    async fn infer_schema(&self, image: &ImageFile) -> Result<InferredSchema, ExtractionError> {
        let body = json!({
            "model": EXTRACTION_MODEL,
            "messages": image_message(image),
        });

        let content = self
            .post_chat("information-extraction/schema-generation", &body)
            .await?
            .ok_or_else(|| ExtractionError::Malformed("response has no message content".into()))?;

        parse_schema_content(&content)
    }

    async fn extract_values(
        &self,
        image: &ImageFile,
        field_names: &[String],
    ) -> Result<HashMap<String, String>, ExtractionError> {
        if field_names.is_empty() {
            return Err(ExtractionError::InvalidInput(
                "at least one field name is required".into(),
            ));
        }

        let body = json!({
            "model": EXTRACTION_MODEL,
            "messages": image_message(image),
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "document_schema",
                    "schema": extraction_schema(field_names),
                }
            },
            "chunking": { "pages_per_chunk": PAGES_PER_CHUNK },
        });

        let content = self.post_chat("information-extraction", &body).await?;
        parse_extracted_content(content.as_deref().unwrap_or("{}"), field_names)
    }

    async fn suggest_title(&self, field_names: &[String]) -> Result<String, ExtractionError> {
        if field_names.is_empty() {
            return Err(ExtractionError::InvalidInput(
                "field names are required".into(),
            ));
        }

        let body = json!({
            "model": TITLE_MODEL,
            "messages": [{ "role": "user", "content": title_prompt(field_names) }],
            "stream": false,
            "max_tokens": 20,
            "temperature": 0.3,
        });

        let content = self.post_chat("chat/completions", &body).await?;
        Ok(clean_title(content.as_deref().unwrap_or("")))
    }
}

/// Schema property key for a display name
///
/// Lowercase, whitespace runs → `_`, anything outside `[a-z0-9_]` dropped.
pub fn api_key_for(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut key = String::with_capacity(lowered.len());
    let mut in_space = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() {
            if !in_space {
                key.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
            key.push(ch);
        }
    }
    key
}

/// Display name for a discovered schema property
///
/// The property's description when present, otherwise the key with `_` → space
/// and each word capitalised.
pub fn display_name_for(key: &str, property: &Value) -> String {
    if let Some(description) = property
        .get("description")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
    {
        return description.to_string();
    }

    let spaced = key.replace('_', " ");
    let mut name = String::with_capacity(spaced.len());
    let mut at_boundary = true;
    for ch in spaced.chars() {
        if at_boundary && ch.is_alphanumeric() {
            name.extend(ch.to_uppercase());
        } else {
            name.push(ch);
        }
        at_boundary = !ch.is_alphanumeric();
    }
    name
}

/// Parse schema-generation content into ordered, de-duplicated display names
pub fn parse_schema_content(content: &str) -> Result<InferredSchema, ExtractionError> {
    let parsed: Value = serde_json::from_str(content)
        .map_err(|e| ExtractionError::Malformed(format!("schema content is not JSON: {}", e)))?;

    let properties = parsed
        .pointer("/json_schema/schema/properties")
        .and_then(Value::as_object)
        .ok_or_else(|| ExtractionError::Malformed("schema has no properties".into()))?;

    let mut seen = HashSet::new();
    let field_names = properties
        .iter()
        .map(|(key, property)| display_name_for(key, property))
        .filter(|name| seen.insert(name.clone()))
        .collect();

    Ok(InferredSchema::new(field_names))
}

/// JSON schema sent with an extraction request
pub fn extraction_schema(field_names: &[String]) -> Value {
    let properties: Map<String, Value> = field_names
        .iter()
        .map(|name| {
            (
                api_key_for(name),
                json!({ "type": "string", "description": name }),
            )
        })
        .collect();

    json!({ "type": "object", "properties": properties })
}

/// Map extraction content (api key → value) back to display names
pub fn parse_extracted_content(
    content: &str,
    field_names: &[String],
) -> Result<HashMap<String, String>, ExtractionError> {
    let parsed: Value = serde_json::from_str(content)
        .map_err(|e| ExtractionError::Malformed(format!("extraction content is not JSON: {}", e)))?;
    let values = parsed
        .as_object()
        .ok_or_else(|| ExtractionError::Malformed("extraction content is not an object".into()))?;

    Ok(field_names
        .iter()
        .map(|name| {
            let value = match values.get(&api_key_for(name)) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect())
}

/// Strip quotes and a leading `Title:` from a model reply
pub fn clean_title(raw: &str) -> String {
    let mut title = raw.trim();
    title = title.strip_prefix(['"', '\'']).unwrap_or(title);
    title = title.strip_suffix(['"', '\'']).unwrap_or(title);

    if title.get(..6).is_some_and(|p| p.eq_ignore_ascii_case("title:")) {
        title = &title[6..];
    }

    let title = title.trim();
    if title.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        title.to_string()
    }
}

fn title_prompt(field_names: &[String]) -> String {
    let fields: Vec<String> = field_names.iter().map(|n| format!("- {}", n)).collect();
    format!(
        "Based on these data field names from a document, suggest a concise, meaningful title for this dataset:\n\n\
         Field names:\n{}\n\n\
         Please respond with only a short, descriptive title (2-5 words) that captures what this data represents. Examples:\n\
         - \"Business Contact Information\"\n\
         - \"Invoice Details\"\n\
         - \"Employee Directory\"\n\n\
         Title:",
        fields.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_for() {
        assert_eq!(api_key_for("Invoice Date"), "invoice_date");
        assert_eq!(api_key_for("Total ($)"), "total_");
        assert_eq!(api_key_for("  Tax   Rate "), "_tax_rate_");
        assert_eq!(api_key_for("e-mail"), "email");
    }

    #[test]
    fn test_display_name_prefers_description() {
        let with_description = json!({ "type": "string", "description": "Company Name" });
        assert_eq!(display_name_for("company_name", &with_description), "Company Name");

        let bare = json!({ "type": "string" });
        assert_eq!(display_name_for("invoice_total_amount", &bare), "Invoice Total Amount");

        let empty = json!({ "description": "" });
        assert_eq!(display_name_for("date", &empty), "Date");
    }

    #[test]
    fn test_parse_schema_content_keeps_order() {
        let content = json!({
            "json_schema": {
                "name": "document_schema",
                "schema": {
                    "type": "object",
                    "properties": {
                        "vendor": { "type": "string", "description": "Vendor" },
                        "total": { "type": "string" },
                        "vendor_name": { "type": "string", "description": "Vendor" },
                        "issue_date": { "type": "string" }
                    }
                }
            }
        })
        .to_string();

        let schema = parse_schema_content(&content).unwrap();
        assert_eq!(schema.field_names, vec!["Vendor", "Total", "Issue Date"]);
        assert_eq!(schema.empty_values().get("Total").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_schema_content_without_properties_is_malformed() {
        assert!(matches!(
            parse_schema_content(r#"{"json_schema":{"schema":{}}}"#),
            Err(ExtractionError::Malformed(_))
        ));
        assert!(matches!(
            parse_schema_content("not json"),
            Err(ExtractionError::Malformed(_))
        ));
    }

    #[test]
    fn test_extraction_schema_uses_api_keys() {
        let schema = extraction_schema(&["Invoice Date".to_string()]);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["invoice_date"]["description"], "Invoice Date");
    }

    #[test]
    fn test_parse_extracted_content() {
        let names = vec![
            "Name".to_string(),
            "Amount".to_string(),
            "Paid".to_string(),
            "Notes".to_string(),
        ];
        let content = r#"{"name":"Bob","amount":12,"paid":null}"#;

        let values = parse_extracted_content(content, &names).unwrap();
        assert_eq!(values["Name"], "Bob");
        assert_eq!(values["Amount"], "12");
        assert_eq!(values["Paid"], "");
        assert_eq!(values["Notes"], "");

        assert!(parse_extracted_content("[1,2]", &names).is_err());
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  \"Invoice Details\"  "), "Invoice Details");
        assert_eq!(clean_title("Title: Employee Directory"), "Employee Directory");
        assert_eq!(clean_title("title:Receipts"), "Receipts");
        assert_eq!(clean_title("'Contacts'"), "Contacts");
        assert_eq!(clean_title(""), FALLBACK_TITLE);
        assert_eq!(clean_title("\"\""), FALLBACK_TITLE);
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        let client = UpstageClient::new("k", "http://localhost/v1/", 0, Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://localhost/v1");
    }
}
