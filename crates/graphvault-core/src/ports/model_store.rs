//! Model store port
//!
//! An opaque key-value store for structured records, keyed by
//! `(schema, id)`. Backup records and details documents persist through
//! it. Values travel as JSON so the trait stays object-safe; typed
//! helpers live on the caller side.

#[async_trait::async_trait]
pub trait ModelStore: Send + Sync {
    /// Writes or replaces the record at `(schema, id)`.
    async fn put(&self, schema: &str, id: &str, record: serde_json::Value) -> anyhow::Result<()>;

    /// Reads the record at `(schema, id)`, `None` when absent.
    async fn get(&self, schema: &str, id: &str) -> anyhow::Result<Option<serde_json::Value>>;

    /// IDs of every record under `schema`.
    async fn list_ids(&self, schema: &str) -> anyhow::Result<Vec<String>>;

    /// Removes the record at `(schema, id)`; absent records are not an
    /// error.
    async fn delete(&self, schema: &str, id: &str) -> anyhow::Result<()>;
}

/// Serialises a typed record and writes it through the store.
pub async fn put_model<T: serde::Serialize + Sync>(
    store: &dyn ModelStore,
    schema: &str,
    id: &str,
    record: &T,
) -> anyhow::Result<()> {
    store.put(schema, id, serde_json::to_value(record)?).await
}

/// Reads and deserialises a typed record, `None` when absent.
pub async fn get_model<T: serde::de::DeserializeOwned>(
    store: &dyn ModelStore,
    schema: &str,
    id: &str,
) -> anyhow::Result<Option<T>> {
    match store.get(schema, id).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}
