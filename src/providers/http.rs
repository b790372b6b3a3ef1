use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{BackendConfig, Secret};
use crate::providers::Backend;
use crate::request::ProbePayload;
use crate::types::{FragmentStream, ResponseFragment};
use crate::ProbeError;

/// Any OpenAI-compatible endpoint: the hosted API, Ollama, vLLM or Llama Stack.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn from_config(config: BackendConfig) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| ProbeError::configuration(format!("{}: {error}", config.name)))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        endpoint(&self.config.base_url, path)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn dispatch(&self, payload: &ProbePayload) -> Result<FragmentStream, ProbeError> {
        let url = self.endpoint(payload.api.path());
        let api_key = self.config.api_key()?;
        let body = payload.to_wire();

        debug!(
            backend = %self.config.name,
            %url,
            stream = payload.stream(),
            "dispatching probe request"
        );

        let response = post_json(
            &self.client,
            &url,
            Some(api_key),
            &body,
            &self.config.name,
            payload.stream(),
        )
        .await?;

        if payload.stream() {
            return Ok(event_stream(response, self.config.name.clone()));
        }

        let value = read_json(response, &self.config.name).await?;
        Ok(Box::pin(stream::iter(vec![Ok(ResponseFragment::Complete(value))])))
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub(crate) async fn post_json(
    client: &Client,
    url: &str,
    api_key: Option<&Secret>,
    body: &Value,
    backend: &str,
    accept_stream: bool,
) -> Result<Response, ProbeError> {
    let mut builder = client.post(url).json(body);
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key.expose());
    }
    if accept_stream {
        builder = builder
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache");
    }

    let response = builder
        .send()
        .await
        .map_err(|error| transport_error(backend, error))?;
    let status = response.status();

    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        warn!(backend, status = status.as_u16(), "backend rejected request");
        return Err(status_error(backend, status, &text));
    }

    Ok(response)
}

pub(crate) async fn read_json(response: Response, backend: &str) -> Result<Value, ProbeError> {
    let text = response
        .text()
        .await
        .map_err(|error| transport_error(backend, error))?;

    serde_json::from_str(&text).map_err(|error| {
        ProbeError::InvalidResponse(format!("{backend} returned malformed json: {error}"))
    })
}

pub(crate) fn transport_error(backend: &str, error: reqwest::Error) -> ProbeError {
    if error.is_builder() {
        return ProbeError::configuration(format!("{backend}: {error}"));
    }
    ProbeError::unavailable(backend, error.to_string())
}

pub(crate) fn status_error(backend: &str, status: StatusCode, body: &str) -> ProbeError {
    let message =
        provider_message(body).unwrap_or_else(|| format!("unexpected status {status}: {body}"));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProbeError::Authentication {
            backend: backend.to_string(),
            message,
        },
        status if status.is_client_error() => ProbeError::InvalidRequest {
            backend: backend.to_string(),
            status: status.as_u16(),
            message,
        },
        status => ProbeError::unavailable(backend, format!("status {status}: {message}")),
    }
}

/// Error text from an OpenAI-style `{"error": {"message"}}` or a FastAPI-style `{"detail"}`.
fn provider_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error").or_else(|| value.get("detail"))?;

    match error {
        Value::String(message) => Some(message.clone()),
        Value::Object(_) => error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(error.to_string())),
        other => Some(other.to_string()),
    }
}

fn event_stream(response: Response, backend: String) -> FragmentStream {
    let stream = try_stream! {
        let mut buffer = Vec::new();
        let mut body_stream = response.bytes_stream();
        let mut finished = false;

        while let Some(chunk) = body_stream.next().await {
            let chunk = chunk
                .map_err(|error| ProbeError::unavailable(backend.clone(), error.to_string()))?;
            buffer.extend_from_slice(&chunk);

            while let Some(event) = extract_sse_event(&mut buffer) {
                match parse_event(&event)? {
                    SseData::Done => {
                        finished = true;
                        break;
                    }
                    SseData::Empty => continue,
                    SseData::Json(value) => {
                        yield ResponseFragment::Delta(value);
                    }
                }
            }

            if finished {
                break;
            }
        }

        // A final event may arrive without its trailing blank line.
        if !finished && !buffer.is_empty() {
            if let SseData::Json(value) = parse_event(&buffer)? {
                yield ResponseFragment::Delta(value);
            }
        }

        debug!(backend = %backend, "event stream finished");
    };

    Box::pin(stream)
}

#[derive(Debug, PartialEq)]
enum SseData {
    Json(Value),
    Done,
    Empty,
}

/// Splits off the first complete event, whichever blank-line delimiter ends it first.
fn extract_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let lf = buffer
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| (pos, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| (pos, 4));

    let (pos, len) = match (lf, crlf) {
        (Some(lf), Some(crlf)) => lf.min(crlf),
        (found, None) | (None, found) => found?,
    };
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + len);
    Some(event)
}

fn parse_event(event: &[u8]) -> Result<SseData, ProbeError> {
    let text = std::str::from_utf8(event)
        .map_err(|_| ProbeError::InvalidResponse("stream event contained invalid utf-8".into()))?;

    let mut payload = String::new();
    for line in text.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            if !payload.is_empty() {
                payload.push('\n');
            }
            payload.push_str(value.trim_start());
        }
    }

    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(SseData::Empty);
    }
    if payload == "[DONE]" {
        return Ok(SseData::Done);
    }

    serde_json::from_str(payload)
        .map(SseData::Json)
        .map_err(|error| ProbeError::InvalidResponse(format!("malformed stream event: {error}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_events_split_by_blank_lines() {
        let mut buffer = b"event: response.created\ndata: {\"a\":1}\n\ndata: [DONE]\n\npartial".to_vec();

        let first = extract_sse_event(&mut buffer).unwrap();
        assert_eq!(parse_event(&first).unwrap(), SseData::Json(json!({ "a": 1 })));

        let second = extract_sse_event(&mut buffer).unwrap();
        assert_eq!(parse_event(&second).unwrap(), SseData::Done);

        assert!(extract_sse_event(&mut buffer).is_none());
        assert_eq!(buffer, b"partial");
    }

    #[test]
    fn mixed_delimiters_split_at_the_earliest_one() {
        let mut buffer = b"data: {\"a\":1}\r\n\r\ndata: {\"b\":2}\n\n".to_vec();

        let first = extract_sse_event(&mut buffer).unwrap();
        assert_eq!(parse_event(&first).unwrap(), SseData::Json(json!({ "a": 1 })));

        let second = extract_sse_event(&mut buffer).unwrap();
        assert_eq!(parse_event(&second).unwrap(), SseData::Json(json!({ "b": 2 })));
        assert!(buffer.is_empty());
    }

    #[test]
    fn comment_only_events_are_empty() {
        assert_eq!(parse_event(b": keep-alive").unwrap(), SseData::Empty);
        assert!(parse_event(b"data: {oops").is_err());
    }

    #[test]
    fn status_codes_map_to_taxonomy() {
        let auth = status_error(
            "openai",
            StatusCode::UNAUTHORIZED,
            r#"{"error":{"message":"Incorrect API key provided"}}"#,
        );
        assert!(matches!(auth, ProbeError::Authentication { ref message, .. } if message == "Incorrect API key provided"));

        let invalid = status_error("llama-stack", StatusCode::NOT_FOUND, r#"{"detail":"Not Found"}"#);
        assert!(matches!(invalid, ProbeError::InvalidRequest { status: 404, ref message, .. } if message == "Not Found"));

        let down = status_error("vllm", StatusCode::BAD_GATEWAY, "upstream error");
        assert!(matches!(down, ProbeError::BackendUnavailable { .. }));
    }

    #[test]
    fn endpoint_joins_without_double_slashes() {
        assert_eq!(
            endpoint("http://localhost:8321/v1/", "/responses"),
            "http://localhost:8321/v1/responses"
        );
    }
}
