//! JSON batch definitions
//!
//! ```json
//! {
//!   "items": [
//!     { "id": "1", "kind": "get", "url": "Products(1)" },
//!     { "changeset": [
//!         { "kind": "update", "url": "Products(1)", "body": { "Price": 3 }, "etag": "W/\"5\"" },
//!         { "kind": "delete", "url": "Products(9)" }
//!     ] }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use odata_client::api::{Batch, Changeset, Operation, OperationKind};

#[derive(Debug, Deserialize)]
pub struct BatchDefinition {
    pub items: Vec<ItemDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ItemDefinition {
    Changeset { changeset: Vec<OperationDefinition> },
    Operation(OperationDefinition),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationDefinition {
    pub id: Option<String>,
    pub kind: OperationKind,
    pub url: String,
    pub body: Option<Value>,
    pub etag: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl OperationDefinition {
    fn into_operation(self) -> Operation {
        let mut op = Operation::new(self.kind, self.url);
        if let Some(id) = self.id {
            op = op.with_id(id);
        }
        if let Some(body) = self.body {
            op = op.with_body(body);
        }
        if let Some(etag) = self.etag {
            op = op.with_etag(etag);
        }
        op.headers = self.headers;
        op
    }
}

impl BatchDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch definition: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid batch definition: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn into_batch(self) -> Batch {
        let mut batch = Batch::new();
        for item in self.items {
            batch = match item {
                ItemDefinition::Operation(op) => batch.add(op.into_operation()),
                ItemDefinition::Changeset { changeset } => batch.changeset(Changeset::from(
                    changeset
                        .into_iter()
                        .map(OperationDefinition::into_operation)
                        .collect::<Vec<_>>(),
                )),
            };
        }
        batch
    }
}
