//! Batch response decoding
//!
//! Accepts a `multipart/mixed` body mirroring the request shape, or the JSON
//! batch format (`{"responses": [...]}`) when the content type carries no
//! boundary. Results are correlated to operations by `Content-ID` and fall
//! back to position in the flattened operation list.

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use super::operation::{Operation, OperationResult};
use crate::api::error::{ODataError, Result};

static BOUNDARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)boundary\s*=\s*"?([^";\s]+)"?"#).unwrap());

/// Per-operation outcomes of one `$batch` call, in flattened operation order
#[derive(Debug, Clone, Default)]
pub struct BatchResponse {
    pub results: Vec<OperationResult>,
}

impl BatchResponse {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.is_success())
    }

    pub fn has_errors(&self) -> bool {
        self.results.iter().any(|r| r.is_error())
    }

    pub fn failed_results(&self) -> Vec<&OperationResult> {
        self.results.iter().filter(|r| r.is_error()).collect()
    }

    /// Operations rejected with 412 Precondition Failed
    pub fn conflicts(&self) -> Vec<&OperationResult> {
        self.results.iter().filter(|r| r.is_conflict()).collect()
    }

    pub fn successful_results(&self) -> Vec<&OperationResult> {
        self.results.iter().filter(|r| r.is_success()).collect()
    }

    /// Result for an operation id
    pub fn get(&self, operation_id: &str) -> Option<&OperationResult> {
        self.results.iter().find(|r| r.operation_id == operation_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Decodes a batch response against the operations that were sent
pub struct BatchResponseParser<'a> {
    operations: &'a [&'a Operation],
}

impl<'a> BatchResponseParser<'a> {
    pub fn new(operations: &'a [&'a Operation]) -> Self {
        Self { operations }
    }

    pub fn parse(&self, body: &str, content_type: &str) -> Result<BatchResponse> {
        let mut collected = match extract_boundary(content_type) {
            Some(boundary) => {
                debug!("Decoding multipart batch response (boundary {})", boundary);
                let mut leaves = Vec::new();
                collect_leaves(body, &boundary, &mut leaves);
                let mut collected = Vec::new();
                for (position, leaf) in leaves.iter().enumerate() {
                    if let Some(result) = self.parse_leaf(leaf, position) {
                        collected.push(result);
                    }
                }
                collected
            }
            None => {
                debug!("No boundary in '{}', trying JSON batch format", content_type);
                self.parse_json(body)?
            }
        };

        // flattened-operation order, uncorrelated results last
        collected.sort_by_key(|(index, _)| index.unwrap_or(usize::MAX));
        Ok(BatchResponse {
            results: collected.into_iter().map(|(_, result)| result).collect(),
        })
    }

    /// Find the operation for a response, by id first, then by position
    fn correlate(&self, id: Option<&str>, position: usize) -> Option<usize> {
        if let Some(id) = id {
            if let Some(index) = self.operations.iter().position(|op| op.id == id) {
                return Some(index);
            }
            debug!("Content-ID '{}' matches no operation, using position {}", id, position);
        }
        (position < self.operations.len()).then_some(position)
    }

    fn result_for(
        &self,
        id: Option<String>,
        position: usize,
        status: u16,
        headers: HashMap<String, String>,
        body: String,
    ) -> (Option<usize>, OperationResult) {
        let index = self.correlate(id.as_deref(), position);
        let operation = index.map(|i| self.operations[i]);
        let operation_id = match (operation, id) {
            (Some(op), _) => op.id.clone(),
            (None, Some(id)) => id,
            (None, None) => position.to_string(),
        };
        let result = match operation {
            Some(op) => OperationResult::for_operation(op, status, headers, body),
            None => OperationResult::from_response(operation_id, status, headers, body, None),
        };
        (index, result)
    }

    fn parse_leaf(&self, leaf: &Leaf<'_>, position: usize) -> Option<(Option<usize>, OperationResult)> {
        let Some(status_at) = leaf.content.find("HTTP/") else {
            warn!("Batch part {} has no status line, skipping", position);
            return None;
        };
        let http = &leaf.content[status_at..];
        let (status_line, rest) = http.split_once('\n').unwrap_or((http, ""));

        let Some(status) = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
        else {
            warn!(
                "Batch part {} has a malformed status line '{}', skipping",
                position,
                status_line.trim()
            );
            return None;
        };

        let (head, body) = split_head_body(rest);
        let headers = parse_headers(head);
        let content_id = parse_headers(leaf.mime_headers)
            .remove("content-id")
            .or_else(|| headers.get("content-id").cloned())
            .map(|id| id.trim_matches(|c| c == '<' || c == '>').to_string());

        let body = body.trim_end_matches(['\r', '\n']).to_string();
        Some(self.result_for(content_id, position, status, headers, body))
    }

    fn parse_json(&self, body: &str) -> Result<Vec<(Option<usize>, OperationResult)>> {
        let value: Value = serde_json::from_str(body).map_err(|e| {
            ODataError::InvalidBatchResponse(format!(
                "no multipart boundary and body is not JSON: {}",
                e
            ))
        })?;
        let responses = value
            .get("responses")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ODataError::InvalidBatchResponse("JSON batch body has no 'responses' array".into())
            })?;

        let mut collected = Vec::with_capacity(responses.len());
        for (position, entry) in responses.iter().enumerate() {
            let Some(status) = entry
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok())
            else {
                warn!("JSON batch response {} has no status, skipping", position);
                continue;
            };

            let id = entry.get("id").and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
            let headers = entry
                .get("headers")
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.to_ascii_lowercase(), v.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            let body = match entry.get("body") {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };

            collected.push(self.result_for(id, position, status, headers, body));
        }
        Ok(collected)
    }
}

/// Decode a batch response; see [`BatchResponseParser`]
pub fn decode(body: &str, content_type: &str, operations: &[&Operation]) -> Result<BatchResponse> {
    BatchResponseParser::new(operations).parse(body, content_type)
}

/// Boundary parameter of a multipart content type
pub fn extract_boundary(content_type: &str) -> Option<String> {
    BOUNDARY_RE
        .captures(content_type)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// One embedded HTTP response and the MIME headers that wrapped it
struct Leaf<'a> {
    mime_headers: &'a str,
    content: &'a str,
}

fn collect_leaves<'a>(body: &'a str, boundary: &str, leaves: &mut Vec<Leaf<'a>>) {
    let delimiter = format!("--{}", boundary);
    // the first piece is the preamble
    for part in body.split(delimiter.as_str()).skip(1) {
        if part.starts_with("--") {
            continue;
        }
        let part = part.trim_start_matches(['\r', '\n']);
        if part.trim().is_empty() {
            continue;
        }

        let (mime_headers, content) = split_head_body(part);
        let nested = parse_headers(mime_headers)
            .get("content-type")
            .filter(|ct| ct.to_ascii_lowercase().starts_with("multipart/mixed"))
            .and_then(|ct| extract_boundary(ct));

        match nested {
            Some(nested) => collect_leaves(content, &nested, leaves),
            None if content.trim().is_empty() => {
                debug!("Skipping header-only batch part");
            }
            None => leaves.push(Leaf {
                mime_headers,
                content,
            }),
        }
    }
}

/// Split at the first blank line, accepting CRLF or bare LF
fn split_head_body(text: &str) -> (&str, &str) {
    if let Some(body) = text.strip_prefix("\r\n").or_else(|| text.strip_prefix('\n')) {
        return ("", body);
    }
    let crlf = text.find("\r\n\r\n").map(|i| (i, 4));
    let lf = text.find("\n\n").map(|i| (i, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((at, len)) => (&text[..at], &text[at + len..]),
        None => (text, ""),
    }
}

/// `Name: value` lines into a map with lower-case names
fn parse_headers(block: &str) -> HashMap<String, String> {
    block
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::operations::batch::{Batch, BatchRequest, Changeset};
    use crate::api::operations::operation::EtagConflict;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Product {
        #[serde(rename = "Id")]
        id: i64,
    }

    fn sample_batch() -> Batch {
        Batch::new()
            .add(Operation::get("Products(1)").with_id("1").expecting::<Product>())
            .add(Operation::create("Products", json!({"Id": 2})).with_id("2"))
            .changeset(
                Changeset::new()
                    .add(Operation::update("Products", 1, json!({"Id": 1})).with_id("3"))
                    .add(Operation::delete("Products", 9).with_id("4")),
            )
    }

    fn leaf(content_id: Option<&str>, status: &str, body: &str) -> String {
        let mut part = String::from("Content-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n");
        if let Some(id) = content_id {
            part.push_str(&format!("Content-ID: {}\r\n", id));
        }
        part.push_str(&format!(
            "\r\nHTTP/1.1 {}\r\nContent-Type: application/json\r\n\r\n{}\r\n",
            status, body
        ));
        part
    }

    /// Changeset members answered before the standalone ones to exercise reordering
    fn multipart_response(with_ids: bool) -> String {
        let id = |s: &'static str| with_ids.then_some(s);
        let mut body = String::new();
        if with_ids {
            body.push_str("--batchresponse_x\r\nContent-Type: multipart/mixed; boundary=changesetresponse_y\r\n\r\n");
            body.push_str(&format!("--changesetresponse_y\r\n{}", leaf(id("<3>"), "204 No Content", "")));
            body.push_str(&format!("--changesetresponse_y\r\n{}", leaf(id("4"), "404 Not Found", r#"{"error":"gone"}"#)));
            body.push_str("--changesetresponse_y--\r\n");
            body.push_str(&format!("--batchresponse_x\r\n{}", leaf(id("1"), "200 OK", r#"{"Id":1}"#)));
            body.push_str(&format!("--batchresponse_x\r\n{}", leaf(id("2"), "201 Created", r#"{"Id":2}"#)));
        } else {
            body.push_str(&format!("--batchresponse_x\r\n{}", leaf(None, "200 OK", r#"{"Id":1}"#)));
            body.push_str(&format!("--batchresponse_x\r\n{}", leaf(None, "201 Created", r#"{"Id":2}"#)));
            body.push_str("--batchresponse_x\r\nContent-Type: multipart/mixed; boundary=changesetresponse_y\r\n\r\n");
            body.push_str(&format!("--changesetresponse_y\r\n{}", leaf(None, "204 No Content", "")));
            body.push_str(&format!("--changesetresponse_y\r\n{}", leaf(None, "404 Not Found", r#"{"error":"gone"}"#)));
            body.push_str("--changesetresponse_y--\r\n");
        }
        body.push_str("--batchresponse_x--\r\n");
        body
    }

    const CONTENT_TYPE: &str = "multipart/mixed; boundary=batchresponse_x";

    fn assert_correlated(response: &BatchResponse) {
        let ids: Vec<&str> = response.results.iter().map(|r| r.operation_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        let statuses: Vec<u16> = response.results.iter().map(|r| r.status_code).collect();
        assert_eq!(statuses, vec![200, 201, 204, 404]);

        let product: Product = response.get("1").unwrap().deserialize().unwrap().unwrap();
        assert_eq!(product, Product { id: 1 });
        assert_eq!(response.get("2").unwrap().body, r#"{"Id":2}"#);
        assert_eq!(response.get("4").unwrap().error.as_deref(), Some(r#"{"error":"gone"}"#));
    }

    #[test]
    fn test_round_trip_with_content_ids() {
        let batch = sample_batch();
        BatchRequest::encode(&batch).unwrap();
        let operations = batch.flatten_operations();

        let response = decode(&multipart_response(true), CONTENT_TYPE, &operations).unwrap();
        assert_eq!(response.len(), 4);
        assert_correlated(&response);
    }

    #[test]
    fn test_positional_correlation_without_content_ids() {
        let batch = sample_batch();
        let operations = batch.flatten_operations();

        let response = decode(&multipart_response(false), CONTENT_TYPE, &operations).unwrap();
        assert_correlated(&response);
    }

    #[test]
    fn test_partial_failure_is_reported_not_raised() {
        let batch = sample_batch();
        let operations = batch.flatten_operations();
        let response = decode(&multipart_response(true), CONTENT_TYPE, &operations).unwrap();

        assert!(!response.all_succeeded());
        assert!(response.has_errors());
        assert_eq!(response.failed_results().len(), 1);
        assert_eq!(response.successful_results().len(), 3);
    }

    #[test]
    fn test_json_fallback() {
        let op = Operation::get("Products").with_id("1");
        let operations = vec![&op];
        let response = decode(
            r#"{"responses":[{"id":"1","status":200,"body":{}}]}"#,
            "application/json",
            &operations,
        )
        .unwrap();
        assert_eq!(response.len(), 1);
        assert!(response.all_succeeded());
        assert_eq!(response.results[0].operation_id, "1");
        assert_eq!(response.results[0].body, "{}");
    }

    #[test]
    fn test_json_fallback_positional() {
        let a = Operation::get("A").with_id("a");
        let b = Operation::get("B").with_id("b");
        let operations = vec![&a, &b];
        let response = decode(
            r#"{"responses":[{"status":200,"body":"ok"},{"status":500,"body":{"error":"boom"}}]}"#,
            "application/json",
            &operations,
        )
        .unwrap();
        assert_eq!(response.get("a").unwrap().body, "ok");
        assert_eq!(response.get("b").unwrap().error.as_deref(), Some(r#"{"error":"boom"}"#));
    }

    #[test]
    fn test_unparseable_body_without_boundary() {
        let result = decode("<html>oops</html>", "text/html", &[]);
        assert!(matches!(result, Err(ODataError::InvalidBatchResponse(_))));
        let result = decode(r#"{"value":[]}"#, "application/json", &[]);
        assert!(matches!(result, Err(ODataError::InvalidBatchResponse(_))));
    }

    #[test]
    fn test_malformed_status_line_skips_only_that_leaf() {
        let a = Operation::get("A").with_id("a");
        let b = Operation::get("B").with_id("b");
        let operations = vec![&a, &b];
        let body = format!(
            "--b\r\n{}--b\r\n{}--b--\r\n",
            leaf(None, "abc Broken", "{}"),
            leaf(None, "200 OK", "{}")
        );
        let response = decode(&body, "multipart/mixed; boundary=b", &operations).unwrap();
        assert_eq!(response.len(), 1);
        assert_eq!(response.results[0].operation_id, "b");
    }

    #[test]
    fn test_body_that_does_not_fit_declared_type_is_swallowed() {
        let op = Operation::get("Products(1)").with_id("1").expecting::<Product>();
        let operations = vec![&op];
        let body = format!("--b\r\n{}--b--\r\n", leaf(Some("1"), "200 OK", r#"{"Id":"x"}"#));
        let response = decode(&body, "multipart/mixed; boundary=b", &operations).unwrap();
        assert!(response.all_succeeded());
        assert!(response.results[0].data.is_none());
    }

    #[test]
    fn test_extract_boundary() {
        assert_eq!(
            extract_boundary("multipart/mixed; boundary=batch_abc").as_deref(),
            Some("batch_abc")
        );
        assert_eq!(
            extract_boundary("multipart/mixed; Boundary=\"batch_q\"; charset=utf-8").as_deref(),
            Some("batch_q")
        );
        assert_eq!(extract_boundary("application/json"), None);
    }

    #[test]
    fn test_lf_only_bodies() {
        let op = Operation::get("A").with_id("a");
        let operations = vec![&op];
        let body = "--b\nContent-Type: application/http\n\nHTTP/1.1 200 OK\nETag: W/\"2\"\n\n{\"x\":1}\n--b--\n";
        let response = decode(body, "multipart/mixed; boundary=b", &operations).unwrap();
        assert_eq!(response.results[0].body, "{\"x\":1}");
        assert_eq!(response.results[0].etag(), Some("W/\"2\""));
    }

    #[test]
    fn test_precondition_failed_part_is_a_conflict() {
        let batch = Batch::new()
            .changeset(
                Changeset::new().add(
                    Operation::update("Products", 1, json!({"Id": 1}))
                        .with_id("1")
                        .with_etag("W/\"1\""),
                ),
            )
            .add(Operation::get("Products(2)").with_id("2"));
        let operations = batch.flatten_operations();
        let body = concat!(
            "--b\r\nContent-Type: application/http\r\nContent-ID: 1\r\n\r\n",
            "HTTP/1.1 412 Precondition Failed\r\nETag: W/\"2\"\r\n\r\n{\"error\":\"stale\"}\r\n",
            "--b\r\nContent-Type: application/http\r\nContent-ID: 2\r\n\r\n",
            "HTTP/1.1 500 Internal Server Error\r\n\r\n{}\r\n",
            "--b--\r\n"
        );

        let response = decode(body, "multipart/mixed; boundary=b", &operations).unwrap();
        let stale = response.get("1").unwrap();
        assert!(stale.is_error());
        assert_eq!(
            stale.conflict,
            Some(EtagConflict {
                expected_etag: Some("W/\"1\"".into()),
                current_etag: Some("W/\"2\"".into()),
            })
        );
        assert!(matches!(
            stale.conflict_error(),
            Some(ODataError::ConcurrencyConflict { .. })
        ));
        assert!(!response.get("2").unwrap().is_conflict());
        assert_eq!(response.conflicts().len(), 1);
    }
}
