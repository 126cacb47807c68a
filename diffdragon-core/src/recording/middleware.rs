use std::collections::HashMap;

use axum::http::{self, HeaderValue};
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use serde::Serialize;

use super::sanitizer::Sanitizer;
use super::types::{CorrelationId, Direction, RecordedEvent, ServiceType, CORRELATION_ID_HEADER};
use super::RecordingLogger;

/// Bodies above this size are recorded as a length marker only.
const MAX_RECORDED_BODY: usize = 10_000;

/// `reqwest_middleware` layer that records each outbound request and its
/// response (or transport error) under the request's correlation id.
pub struct RecordingMiddleware {
    logger: RecordingLogger,
    service_type: ServiceType,
}

impl RecordingMiddleware {
    pub fn new(logger: RecordingLogger, service_type: ServiceType) -> Self {
        Self {
            logger,
            service_type,
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RecordingMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let correlation_id = correlation_id_for(&req, extensions);

        if !req.headers().contains_key(CORRELATION_ID_HEADER) {
            if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
                req.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
        }

        let request_data = RequestData::from_request(&req);
        let operation = format!("{} {}", request_data.method, extract_path(&request_data.url));
        self.record(&correlation_id, Direction::Request, operation, &request_data);

        let response = next.run(req, extensions).await;

        match &response {
            Ok(resp) => {
                let response_data = ResponseData::from_response(resp);
                let operation = format!("response_{}", response_data.status_code);
                self.record(&correlation_id, Direction::Response, operation, &response_data);
            }
            Err(err) => {
                let data = serde_json::json!({
                    "error": err.to_string(),
                    "error_type": format!("{:?}", err),
                });
                self.record(&correlation_id, Direction::Response, "error", &data);
            }
        }

        response
    }
}

impl RecordingMiddleware {
    fn record(
        &self,
        correlation_id: &CorrelationId,
        direction: Direction,
        operation: impl Into<String>,
        data: &impl Serialize,
    ) {
        let data = serde_json::to_value(data).unwrap_or(serde_json::Value::Null);
        self.logger.record(RecordedEvent::now(
            correlation_id,
            self.service_type.event_type(),
            direction,
            operation,
            data,
        ));
    }
}

/// Prefer an explicit header, then a request extension, else mint a fresh id.
fn correlation_id_for(req: &Request, extensions: &http::Extensions) -> CorrelationId {
    if let Some(value) = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        return CorrelationId(value.to_string());
    }

    extensions
        .get::<CorrelationId>()
        .cloned()
        .unwrap_or_else(CorrelationId::generate)
}

#[derive(Debug, Serialize)]
struct RequestData {
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: String,
}

impl RequestData {
    fn from_request(request: &Request) -> Self {
        let body = match request.body() {
            None => "[NO_BODY]".to_string(),
            Some(body) => match body.as_bytes() {
                None => "[STREAM_BODY]".to_string(),
                Some(bytes) if bytes.len() > MAX_RECORDED_BODY => {
                    format!("[LARGE_BODY_{}b]", bytes.len())
                }
                Some(bytes) => match std::str::from_utf8(bytes) {
                    Ok(text) => text.to_string(),
                    Err(_) => format!("[BINARY_BODY_{}b]", bytes.len()),
                },
            },
        };

        Self {
            method: request.method().to_string(),
            url: request.url().to_string(),
            headers: Sanitizer::sanitize_header_map(request.headers()),
            body,
        }
    }
}

#[derive(Debug, Serialize)]
struct ResponseData {
    status_code: u16,
    headers: HashMap<String, String>,
    body_size: u64,
}

impl ResponseData {
    fn from_response(response: &Response) -> Self {
        Self {
            status_code: response.status().as_u16(),
            headers: Sanitizer::sanitize_header_map(response.headers()),
            body_size: response.content_length().unwrap_or(0),
        }
    }
}

fn extract_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_path_strips_host_and_query() {
        assert_eq!(
            extract_path("https://api.github.com/repos/o/r/pulls/1/files?page=2"),
            "/repos/o/r/pulls/1/files"
        );
        assert_eq!(extract_path("not a url"), "not a url");
    }

    #[test]
    fn test_correlation_id_prefers_header_then_extension() {
        let mut req = Request::new(
            reqwest::Method::GET,
            url::Url::parse("https://api.github.com/").unwrap(),
        );
        let mut extensions = http::Extensions::new();
        extensions.insert(CorrelationId("from-extension".to_string()));

        assert_eq!(correlation_id_for(&req, &extensions).as_str(), "from-extension");

        req.headers_mut().insert(
            CORRELATION_ID_HEADER,
            HeaderValue::from_static("from-header"),
        );
        assert_eq!(correlation_id_for(&req, &extensions).as_str(), "from-header");
    }
}
