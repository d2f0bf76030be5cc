//! Batch model and `multipart/mixed` encoder
//!
//! A [`Batch`] is an ordered list of standalone operations and changesets.
//! [`BatchRequest::encode`] turns it into the wire body sent to `$batch`.

use log::{debug, warn};
use std::collections::HashSet;
use uuid::Uuid;

use super::operation::{Operation, OperationKind};
use crate::api::error::{ODataError, Result};

const CRLF: &str = "\r\n";

/// Operations that succeed or fail together
#[derive(Debug, Clone)]
pub struct Changeset {
    pub id: String,
    pub operations: Vec<Operation>,
}

impl Changeset {
    pub fn new() -> Self {
        Self {
            id: super::operation::short_id(),
            operations: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn add(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl Default for Changeset {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Operation>> for Changeset {
    fn from(operations: Vec<Operation>) -> Self {
        Self {
            operations,
            ..Self::new()
        }
    }
}

#[derive(Debug, Clone)]
pub enum BatchItem {
    Operation(Operation),
    Changeset(Changeset),
}

/// Ordered list of operations and changesets, consumed once by the encoder
#[derive(Debug, Clone, Default)]
pub struct Batch {
    items: Vec<BatchItem>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a standalone operation
    pub fn add(mut self, operation: Operation) -> Self {
        self.items.push(BatchItem::Operation(operation));
        self
    }

    /// Append an atomic group
    pub fn changeset(mut self, changeset: impl Into<Changeset>) -> Self {
        self.items.push(BatchItem::Changeset(changeset.into()));
        self
    }

    pub fn push(&mut self, item: BatchItem) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    /// Operations in wire order, changeset members flattened in place
    pub fn flatten_operations(&self) -> Vec<&Operation> {
        let mut operations = Vec::new();
        for item in &self.items {
            match item {
                BatchItem::Operation(op) => operations.push(op),
                BatchItem::Changeset(cs) => operations.extend(cs.operations.iter()),
            }
        }
        operations
    }

    /// Number of operations after flattening
    pub fn len(&self) -> usize {
        self.flatten_operations().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_ids(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for op in self.flatten_operations() {
            if !seen.insert(op.id.as_str()) {
                return Err(ODataError::InvalidBatch(format!(
                    "duplicate operation id '{}'",
                    op.id
                )));
            }
        }
        Ok(())
    }
}

impl FromIterator<Operation> for Batch {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().map(BatchItem::Operation).collect(),
        }
    }
}

/// An encoded `$batch` request body
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub boundary: String,
    pub body: String,
}

impl BatchRequest {
    /// Encode a batch with a fresh outer boundary and one per changeset
    pub fn encode(batch: &Batch) -> Result<Self> {
        batch.check_ids()?;

        let boundary = format!("batch_{}", Uuid::new_v4().simple());
        let mut body = String::new();

        for item in batch.items() {
            match item {
                BatchItem::Operation(op) => {
                    open_part(&mut body, &boundary);
                    write_operation(&mut body, op)?;
                }
                BatchItem::Changeset(cs) => {
                    if cs.is_empty() {
                        warn!("Skipping empty changeset {}", cs.id);
                        continue;
                    }
                    let cs_boundary = format!("changeset_{}", Uuid::new_v4().simple());
                    open_part(&mut body, &boundary);
                    body.push_str(&format!(
                        "Content-Type: multipart/mixed; boundary={}{CRLF}{CRLF}",
                        cs_boundary
                    ));
                    for op in &cs.operations {
                        if op.kind == OperationKind::Get {
                            warn!("GET operation {} inside changeset {}", op.id, cs.id);
                        }
                        open_part(&mut body, &cs_boundary);
                        write_operation(&mut body, op)?;
                    }
                    body.push_str(&format!("--{}--{CRLF}", cs_boundary));
                }
            }
        }
        body.push_str(&format!("--{}--{CRLF}", boundary));

        debug!(
            "Encoded batch {} with {} operations ({} bytes)",
            boundary,
            batch.len(),
            body.len()
        );
        Ok(Self { boundary, body })
    }

    /// Value for the request's `Content-Type` header
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }
}

fn open_part(body: &mut String, boundary: &str) {
    body.push_str(&format!("--{}{CRLF}", boundary));
}

fn write_operation(body: &mut String, op: &Operation) -> Result<()> {
    body.push_str(&format!("Content-Type: application/http{CRLF}"));
    body.push_str(&format!("Content-Transfer-Encoding: binary{CRLF}"));
    body.push_str(&format!("Content-ID: {}{CRLF}{CRLF}", op.id));

    body.push_str(&format!("{} {} HTTP/1.1{CRLF}", op.http_method(), op.url));
    for (name, value) in &op.headers {
        body.push_str(&format!("{}: {}{CRLF}", name, value));
    }
    if let Some(etag) = op.if_match() {
        body.push_str(&format!("If-Match: {}{CRLF}", etag));
    }

    if op.kind.has_body() {
        let json = match &op.body {
            Some(value) => serde_json::to_string(value)?,
            None => "{}".to_string(),
        };
        let has_content_type = op
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("content-type"));
        if !has_content_type {
            body.push_str(&format!("Content-Type: application/json; type=entry{CRLF}"));
        }
        body.push_str(CRLF);
        body.push_str(&json);
        body.push_str(CRLF);
    } else {
        body.push_str(CRLF);
    }
    body.push_str(CRLF);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_batch() -> Batch {
        Batch::new()
            .add(Operation::get("Products(1)").with_id("1"))
            .add(Operation::create("Products", json!({"Name": "Pen"})).with_id("2"))
            .changeset(
                Changeset::new()
                    .add(
                        Operation::update("Products", 1, json!({"Price": 3}))
                            .with_id("3")
                            .with_etag("W/\"5\""),
                    )
                    .add(Operation::delete("Products", 9).with_id("4")),
            )
    }

    #[test]
    fn test_flatten_keeps_changeset_members_in_place() {
        let batch = sample_batch();
        let ids: Vec<&str> = batch.flatten_operations().iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.items().len(), 3);
    }

    #[test]
    fn test_encode_layout() {
        let request = BatchRequest::encode(&sample_batch()).unwrap();
        let body = &request.body;

        assert!(request.boundary.starts_with("batch_"));
        assert_eq!(
            request.content_type(),
            format!("multipart/mixed; boundary={}", request.boundary)
        );
        assert!(body.starts_with(&format!("--{}\r\n", request.boundary)));
        assert!(body.ends_with(&format!("--{}--\r\n", request.boundary)));

        assert!(body.contains("GET Products(1) HTTP/1.1\r\n"));
        assert!(body.contains("POST Products HTTP/1.1\r\n"));
        assert!(body.contains("{\"Name\":\"Pen\"}"));
        assert!(body.contains("PATCH Products(1) HTTP/1.1\r\nIf-Match: W/\"5\"\r\n"));
        assert!(body.contains("DELETE Products(9) HTTP/1.1\r\n"));
        assert_eq!(body.matches("Content-Transfer-Encoding: binary").count(), 4);

        // parts appear in the order they were added
        let get = body.find("Content-ID: 1\r\n").unwrap();
        let post = body.find("Content-ID: 2\r\n").unwrap();
        let patch = body.find("Content-ID: 3\r\n").unwrap();
        let delete = body.find("Content-ID: 4\r\n").unwrap();
        assert!(get < post && post < patch && patch < delete);
    }

    #[test]
    fn test_changeset_has_its_own_boundary() {
        let request = BatchRequest::encode(&sample_batch()).unwrap();
        let marker = "Content-Type: multipart/mixed; boundary=";
        let start = request.body.find(marker).unwrap() + marker.len();
        let cs_boundary: String = request.body[start..]
            .chars()
            .take_while(|c| !c.is_whitespace())
            .collect();

        assert!(cs_boundary.starts_with("changeset_"));
        assert_ne!(cs_boundary, request.boundary);
        assert_eq!(request.body.matches(&format!("--{}\r\n", cs_boundary)).count(), 2);
        assert!(request.body.contains(&format!("--{}--\r\n", cs_boundary)));
    }

    #[test]
    fn test_boundaries_are_fresh_per_call() {
        let batch = sample_batch();
        let a = BatchRequest::encode(&batch).unwrap();
        let b = BatchRequest::encode(&batch).unwrap();
        assert_ne!(a.boundary, b.boundary);
    }

    #[test]
    fn test_etag_ignored_on_get_and_headers_forwarded() {
        let batch: Batch = vec![
            Operation::get("Orders")
                .with_id("a")
                .with_etag("W/\"1\"")
                .with_header("Prefer", "odata.maxpagesize=10"),
        ]
        .into_iter()
        .collect();
        let request = BatchRequest::encode(&batch).unwrap();
        assert!(!request.body.contains("If-Match"));
        assert!(request.body.contains("Prefer: odata.maxpagesize=10\r\n"));
        assert!(!request.body.contains("application/json"));
    }

    #[test]
    fn test_caller_content_type_is_not_duplicated() {
        let batch: Batch = vec![
            Operation::create("Notes", json!({"Text": "hi"}))
                .with_id("n")
                .with_header("content-type", "application/json;odata.metadata=minimal"),
        ]
        .into_iter()
        .collect();
        let request = BatchRequest::encode(&batch).unwrap();
        assert_eq!(request.body.matches("application/json").count(), 1);
        assert!(!request.body.contains("type=entry"));
        assert!(request.body.contains("content-type: application/json;odata.metadata=minimal\r\n\r\n{\"Text\":\"hi\"}"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let batch = Batch::new()
            .add(Operation::get("A").with_id("x"))
            .changeset(vec![Operation::delete("B", 1).with_id("x")]);
        assert!(matches!(
            BatchRequest::encode(&batch),
            Err(ODataError::InvalidBatch(_))
        ));
    }
}
