//! Model store over the snapshot repository's operator
//!
//! Structured records (backup records, details documents) live beside
//! the snapshots as JSON objects keyed by `(schema, id)`.

use anyhow::Context;
use opendal::Operator;

use graphvault_core::ports::model_store::ModelStore;

fn model_key(schema: &str, id: &str) -> String {
    format!("models/{schema}/{id}.json")
}

/// `(schema, id)` keyed JSON record store in the object store.
#[derive(Clone)]
pub struct ObjectModelStore {
    op: Operator,
}

impl ObjectModelStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }
}

#[async_trait::async_trait]
impl ModelStore for ObjectModelStore {
    async fn put(&self, schema: &str, id: &str, record: serde_json::Value) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(&record).context("serialising model record")?;
        self.op
            .write(&model_key(schema, id), bytes)
            .await
            .with_context(|| format!("writing model {schema}/{id}"))?;
        Ok(())
    }

    async fn get(&self, schema: &str, id: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let key = model_key(schema, id);
        if !self.op.exists(&key).await? {
            return Ok(None);
        }

        let bytes = self.op.read(&key).await?.to_vec();
        let value =
            serde_json::from_slice(&bytes).with_context(|| format!("parsing model {schema}/{id}"))?;
        Ok(Some(value))
    }

    async fn list_ids(&self, schema: &str) -> anyhow::Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in self.op.list(&format!("models/{schema}/")).await? {
            if let Some(id) = entry.name().strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    async fn delete(&self, schema: &str, id: &str) -> anyhow::Result<()> {
        self.op
            .delete(&model_key(schema, id))
            .await
            .with_context(|| format!("deleting model {schema}/{id}"))?;
        Ok(())
    }
}
