//! Incremental change enumeration via Graph delta queries
//!
//! Per (owner, folder, category), [`collect_folder_changes`] walks the
//! paged delta stream and splits entries into added and removed item
//! IDs. The final page's `@odata.deltaLink` becomes the token for the
//! next run. When the server rejects a saved token, accumulated results
//! are discarded and the walk restarts tokenless with `reset` flagged.
//!
//! IDs keep server page order. An ID appearing more than once keeps its
//! first position; the add/remove bit is last-writer-wins.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use graphvault_core::domain::errors::MultiError;

use crate::client::GraphClient;
use crate::errors::ConnectorError;

/// Rate-limit category for delta requests.
const DELTA_CATEGORY: &str = "delta";

/// The new delta token for a folder, with the fallback marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaUpdate {
    /// Opaque delta URL to save for the next run.
    pub url: String,
    /// True when the prior token was rejected and a full enumeration
    /// was substituted.
    pub reset: bool,
}

/// Added/removed item IDs for one folder since the last token.
#[derive(Debug)]
pub struct FolderChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub update: DeltaUpdate,
}

// ============================================================================
// Wire types
// ============================================================================

/// A single page of any Graph list endpoint.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaPage {
    #[serde(default)]
    value: Vec<DeltaEntry>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

/// Minimal view of a delta entry: its ID and deletion markers.
///
/// Outlook endpoints mark removals with `@removed`; drive endpoints use
/// a `deleted` facet. Both are treated identically.
#[derive(Debug, Deserialize)]
struct DeltaEntry {
    id: String,
    #[serde(rename = "@removed")]
    removed: Option<serde_json::Value>,
    #[serde(default)]
    deleted: Option<serde_json::Value>,
}

impl DeltaEntry {
    fn is_removed(&self) -> bool {
        self.removed.is_some() || self.deleted.is_some()
    }
}

// ============================================================================
// Accumulation
// ============================================================================

/// Ordered ID accumulator with a last-writer-wins add/remove bit.
#[derive(Debug, Default)]
struct ChangeAccumulator {
    order: Vec<String>,
    removed_bit: HashMap<String, bool>,
}

impl ChangeAccumulator {
    fn record(&mut self, id: String, removed: bool) {
        if !self.removed_bit.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.removed_bit.insert(id, removed);
    }

    fn into_lists(self) -> (Vec<String>, Vec<String>) {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        for id in self.order {
            let is_removed = self.removed_bit[&id];
            if is_removed {
                removed.push(id);
            } else {
                added.push(id);
            }
        }
        (added, removed)
    }
}

// ============================================================================
// Delta walk
// ============================================================================

/// Enumerates changes for one folder.
///
/// `endpoint` is the folder's delta path (e.g.
/// `/users/{id}/mailFolders/{fid}/messages/delta`); `old_delta` is the
/// saved delta URL from the prior run, absent on first backup.
pub async fn collect_folder_changes(
    client: &GraphClient,
    endpoint: &str,
    old_delta: Option<&str>,
) -> Result<FolderChanges, ConnectorError> {
    match walk_delta(client, endpoint, old_delta).await {
        Ok((added, removed, url)) => Ok(FolderChanges {
            added,
            removed,
            update: DeltaUpdate { url, reset: false },
        }),
        Err(ConnectorError::InvalidDelta) if old_delta.is_some() => {
            warn!(endpoint, "Saved delta token rejected, falling back to full enumeration");
            let (added, removed, url) = walk_delta(client, endpoint, None).await?;
            Ok(FolderChanges {
                added,
                removed,
                update: DeltaUpdate { url, reset: true },
            })
        }
        Err(other) => Err(other),
    }
}

async fn walk_delta(
    client: &GraphClient,
    endpoint: &str,
    old_delta: Option<&str>,
) -> Result<(Vec<String>, Vec<String>, String), ConnectorError> {
    let mut accumulator = ChangeAccumulator::default();
    let mut url = old_delta.unwrap_or(endpoint).to_string();
    let mut pages: u32 = 0;

    loop {
        let page: DeltaPage = client.get_json(&url, DELTA_CATEGORY).await?;
        pages += 1;

        for entry in page.value {
            let is_removed = entry.is_removed();
            accumulator.record(entry.id, is_removed);
        }

        if let Some(next) = page.next_link {
            url = next;
            continue;
        }

        let delta_url = page.delta_link.ok_or_else(|| {
            ConnectorError::NonRecoverable(anyhow::anyhow!(
                "delta enumeration for {endpoint} ended without a deltaLink"
            ))
        })?;

        let (added, removed) = accumulator.into_lists();
        debug!(
            endpoint,
            pages,
            added = added.len(),
            removed = removed.len(),
            "Delta walk complete"
        );
        return Ok((added, removed, delta_url));
    }
}

// ============================================================================
// Generic page walking (container enumeration)
// ============================================================================

/// Walks a paged list endpoint breadth-first via next-links, invoking
/// `visit` for each entry.
///
/// Visit failures are aggregated and returned; a failing server request
/// aborts the walk with an error instead.
pub async fn visit_all_pages<T, F>(
    client: &GraphClient,
    path: &str,
    category: &str,
    mut visit: F,
) -> Result<MultiError, ConnectorError>
where
    T: DeserializeOwned,
    F: FnMut(T) -> Result<(), ConnectorError>,
{
    let mut errors = MultiError::new();
    let mut url = path.to_string();

    loop {
        let page: Page<T> = client.get_json(&url, category).await?;

        for entry in page.value {
            if let Err(err) = visit(entry) {
                errors.push(err.into());
            }
        }

        match page.next_link {
            Some(next) => url = next,
            None => return Ok(errors),
        }
    }
}
