use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::prompt::{
    analysis_tool, build_analysis_prompt, build_metadata_prompt, build_records_prompt,
    metadata_tool, records_tool, ANALYSIS_MAX_TOKENS, ANALYSIS_TOOL, METADATA_MAX_TOKENS,
    METADATA_TOOL, RECORDS_MAX_TOKENS, RECORDS_TOOL,
};
use super::types::{AiBackend, AnalysisContext};
use super::BackendError;
use crate::models::{AnalysisEntry, AnalysisMap, CaseMetadata, EntrySource, ExtractedRequest, RequestRecord};

const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Messages API client that forces a named tool call for every operation
/// and reads the tool input back as structured output.
pub struct AnthropicBackend {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl AnthropicBackend {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Connection(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one prompt with a single forced tool and return that tool's input.
    fn call_tool(
        &self,
        prompt: &str,
        tool: Value,
        tool_name: &str,
        max_tokens: u32,
    ) -> Result<Value, BackendError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens,
            tools: vec![tool],
            tool_choice: ToolChoice {
                kind: "tool",
                name: tool_name,
            },
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    BackendError::Connection(format!("{}: {e}", self.base_url))
                } else if e.is_timeout() {
                    BackendError::Connection(format!("Request timed out after {}s", self.timeout_secs))
                } else {
                    BackendError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let parsed: MessagesResponse = response
            .json()
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

        tool_input(parsed, tool_name)
    }
}

impl AiBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn extract_records(&self, text: &str) -> Result<Vec<ExtractedRequest>, BackendError> {
        let input = self.call_tool(
            &build_records_prompt(text),
            records_tool(),
            RECORDS_TOOL,
            RECORDS_MAX_TOKENS,
        )?;
        parse_records(input)
    }

    fn extract_metadata(&self, text: &str) -> Result<CaseMetadata, BackendError> {
        let input = self.call_tool(
            &build_metadata_prompt(text),
            metadata_tool(),
            METADATA_TOOL,
            METADATA_MAX_TOKENS,
        )?;
        parse_metadata(input)
    }

    fn analyze(
        &self,
        records: &[RequestRecord],
        context: &AnalysisContext,
    ) -> Result<AnalysisMap, BackendError> {
        let prompt = build_analysis_prompt(records, &context.documents, &context.objections);
        let input = self.call_tool(&prompt, analysis_tool(), ANALYSIS_TOOL, ANALYSIS_MAX_TOKENS)?;
        parse_analysis(input)
    }
}

// ── Wire types ──────────────────────────────────────────────

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    tools: Vec<Value>,
    tool_choice: ToolChoice<'a>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct ToolChoice<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Deserialize)]
struct RecordsInput {
    #[serde(default)]
    requests: Vec<ExtractedRequest>,
}

#[derive(Deserialize)]
struct AnalysisInput {
    #[serde(default)]
    analyses: HashMap<String, AnalysisEntry>,
}

// ── Response handling ───────────────────────────────────────

/// Map a non-success HTTP status to a backend error kind.
fn classify_status(status: u16, body: String) -> BackendError {
    match status {
        429 => BackendError::RateLimited(body),
        500 | 502 | 503 | 504 | 529 => BackendError::Server { status, body },
        _ => BackendError::Api { status, body },
    }
}

fn tool_input(response: MessagesResponse, tool_name: &str) -> Result<Value, BackendError> {
    response
        .content
        .into_iter()
        .find(|b| b.kind == "tool_use" && b.name.as_deref() == Some(tool_name))
        .and_then(|b| b.input)
        .ok_or_else(|| BackendError::MalformedResponse(format!("No {tool_name} tool call in response")))
}

fn parse_records(input: Value) -> Result<Vec<ExtractedRequest>, BackendError> {
    let parsed: RecordsInput =
        serde_json::from_value(input).map_err(|e| BackendError::MalformedResponse(e.to_string()))?;
    Ok(parsed
        .requests
        .into_iter()
        .filter(|r| !r.text.trim().is_empty())
        .collect())
}

fn parse_metadata(input: Value) -> Result<CaseMetadata, BackendError> {
    let metadata: CaseMetadata =
        serde_json::from_value(input).map_err(|e| BackendError::MalformedResponse(e.to_string()))?;
    Ok(metadata.with_derived_titles())
}

fn parse_analysis(input: Value) -> Result<AnalysisMap, BackendError> {
    let parsed: AnalysisInput =
        serde_json::from_value(input).map_err(|e| BackendError::MalformedResponse(e.to_string()))?;
    Ok(parsed
        .analyses
        .into_iter()
        .map(|(number, mut entry)| {
            entry.source = EntrySource::Ai;
            (number, entry)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve exactly one HTTP response on a local port. Returns the base URL.
    fn serve_once(status: u16, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&chunk[..n]);
                if let Some(end) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                    let headers = String::from_utf8_lossy(&received[..end]).to_lowercase();
                    let length = headers
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if received.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status} Test\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
        format!("http://{addr}")
    }

    fn backend(base_url: &str) -> AnthropicBackend {
        AnthropicBackend::new(base_url, "sk-test", "test-model", Duration::from_secs(5)).unwrap()
    }

    fn tool_response(name: &str, input: Value) -> String {
        json!({
            "content": [
                { "type": "text", "text": "Here you go." },
                { "type": "tool_use", "id": "tu_1", "name": name, "input": input }
            ]
        })
        .to_string()
    }

    #[test]
    fn status_classification() {
        assert!(matches!(classify_status(429, String::new()), BackendError::RateLimited(_)));
        assert!(matches!(classify_status(529, String::new()), BackendError::Server { status: 529, .. }));
        assert!(matches!(classify_status(503, String::new()), BackendError::Server { .. }));
        assert!(matches!(classify_status(401, String::new()), BackendError::Api { status: 401, .. }));
        assert!(matches!(classify_status(400, String::new()), BackendError::Api { .. }));
    }

    #[test]
    fn missing_tool_block_is_malformed() {
        let response: MessagesResponse =
            serde_json::from_value(json!({ "content": [{ "type": "text", "text": "no tools" }] })).unwrap();
        let err = tool_input(response, RECORDS_TOOL).unwrap_err();
        assert!(matches!(err, BackendError::MalformedResponse(_)));
    }

    #[test]
    fn analysis_entries_are_marked_ai() {
        let map = parse_analysis(json!({
            "analyses": {
                "1": {
                    "objections": ["vague"],
                    "objection_reasoning": { "vague": "Uses 'any'." },
                    "objection_arguments": { "vague": "Vague as to 'any'." },
                    "documents": ["d1"],
                    "notes": "ok"
                }
            }
        }))
        .unwrap();
        assert_eq!(map["1"].source, EntrySource::Ai);
        assert_eq!(map["1"].reasoning["vague"], "Uses 'any'.");
    }

    #[test]
    fn blank_records_are_dropped() {
        let records = parse_records(json!({
            "requests": [
                { "number": "1", "text": "All contracts." },
                { "number": "2", "text": "   " }
            ]
        }))
        .unwrap();
        assert_eq!(records, vec![ExtractedRequest::new("1", "All contracts.")]);
    }

    #[test]
    fn metadata_gets_derived_titles_when_missing() {
        let meta = parse_metadata(json!({
            "case_no": "BC123456",
            "responding_party": "Plaintiff Jane Doe",
            "propounding_party": "Defendant Acme Corp."
        }))
        .unwrap();
        assert_eq!(meta.case_no, "BC123456");
        assert!(meta.document_title.starts_with("PLAINTIFF JANE DOE'S RESPONSES"));
    }

    #[test]
    fn extract_records_over_http() {
        let body = tool_response(
            RECORDS_TOOL,
            json!({ "requests": [
                { "number": "1", "text": "All docuemnts relating to the lease." },
                { "number": "2", "text": "All invoices." }
            ]}),
        );
        let url = serve_once(200, body);

        let records = backend(&url).extract_records("REQUEST NO. 1 ...").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "All docuemnts relating to the lease.");
    }

    #[test]
    fn rate_limit_response_maps_to_rate_limited() {
        let url = serve_once(429, json!({ "type": "error" }).to_string());
        let err = backend(&url).extract_metadata("caption").unwrap_err();
        assert!(matches!(err, BackendError::RateLimited(_)), "got {err:?}");
    }

    #[test]
    fn auth_failure_is_not_retryable() {
        let url = serve_once(401, json!({ "error": "invalid x-api-key" }).to_string());
        let err = backend(&url)
            .analyze(&[RequestRecord::new(1, "1", "x")], &AnalysisContext::default())
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn refused_connection_maps_to_connection_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = backend(&format!("http://127.0.0.1:{port}"))
            .extract_records("text")
            .unwrap_err();
        assert!(matches!(err, BackendError::Connection(_)), "got {err:?}");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let b = backend("http://localhost:8080/");
        assert_eq!(b.base_url, "http://localhost:8080");
        assert_eq!(b.model(), "test-model");
    }
}
