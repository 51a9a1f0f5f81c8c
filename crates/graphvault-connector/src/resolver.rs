//! Container resolver: folder IDs to folder paths
//!
//! Remote folders arrive as a flat set of `{id, displayName, parentId}`
//! records. The resolver turns them into absolute folder paths with a
//! memoised depth-first walk. Roots are injected by seeding a path
//! (possibly empty, for hidden root aliases) so traversal short-circuits
//! there. A fixed depth bound doubles as the cycle guard; a visited set
//! catches cycles early within a single lookup.
//!
//! The cache is populated once per run and read-only afterwards.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use graphvault_core::domain::errors::MultiError;
use graphvault_core::domain::path::PathBuilder;

use crate::errors::ConnectorError;

/// Maximum folder nesting the resolver will traverse.
pub const MAX_FOLDER_DEPTH: usize = 300;

/// One remote folder known to the resolver.
#[derive(Debug, Clone)]
pub struct Container {
    id: String,
    display_name: String,
    parent_id: Option<String>,
    /// Folder path, assigned lazily during resolution or seeded for roots.
    path: Option<PathBuilder>,
}

impl Container {
    /// A folder that will be resolved through its parent chain.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            parent_id: Some(parent_id.into()),
            path: None,
        }
    }

    /// A root folder injected with a pre-computed path. An empty builder
    /// is valid and marks a hidden root alias.
    pub fn seeded(
        id: impl Into<String>,
        display_name: impl Into<String>,
        path: PathBuilder,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            parent_id: None,
            path: Some(path),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Resolved folder path, once assigned.
    pub fn path(&self) -> Option<&PathBuilder> {
        self.path.as_ref()
    }
}

/// Memoised folder-ID to path index for one (owner, category).
#[derive(Debug, Default)]
pub struct ContainerResolver {
    cache: HashMap<String, Container>,
}

impl ContainerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and stores a container.
    ///
    /// `id` and `displayName` must be non-empty. A container without a
    /// seeded path must carry a non-empty parent ID. Empty strings are
    /// treated as missing.
    pub fn add_to_cache(&mut self, container: Container) -> Result<(), ConnectorError> {
        if container.id.is_empty() {
            return Err(ConnectorError::Domain(
                graphvault_core::domain::errors::DomainError::MissingValue("container id"),
            ));
        }
        if container.display_name.is_empty() {
            return Err(ConnectorError::Domain(
                graphvault_core::domain::errors::DomainError::MissingValue("container displayName"),
            ));
        }
        if container.path.is_none()
            && container
                .parent_id
                .as_deref()
                .map(str::is_empty)
                .unwrap_or(true)
        {
            return Err(ConnectorError::Domain(
                graphvault_core::domain::errors::DomainError::MissingValue("container parentId"),
            ));
        }

        self.cache.insert(container.id.clone(), container);
        Ok(())
    }

    /// Resolves a container ID to its folder path, memoising the result.
    pub fn id_to_path(&mut self, id: &str) -> Result<PathBuilder, ConnectorError> {
        let mut visited = HashSet::new();
        self.resolve(id, 0, &mut visited)
    }

    fn resolve(
        &mut self,
        id: &str,
        depth: usize,
        visited: &mut HashSet<String>,
    ) -> Result<PathBuilder, ConnectorError> {
        if depth >= MAX_FOLDER_DEPTH {
            return Err(ConnectorError::DepthExceeded {
                id: id.to_string(),
                max: MAX_FOLDER_DEPTH,
            });
        }

        let container = self
            .cache
            .get(id)
            .ok_or_else(|| ConnectorError::NotFound(id.to_string()))?;

        if let Some(path) = &container.path {
            return Ok(path.clone());
        }

        if !visited.insert(id.to_string()) {
            // Revisiting within one lookup means the parent chain loops.
            return Err(ConnectorError::DepthExceeded {
                id: id.to_string(),
                max: MAX_FOLDER_DEPTH,
            });
        }

        let display_name = container.display_name.clone();
        let parent_id = match container.parent_id.clone() {
            Some(parent) if !parent.is_empty() => parent,
            _ => {
                return Err(ConnectorError::MissingParent {
                    id: id.to_string(),
                    parent: String::new(),
                })
            }
        };

        let parent_path = match self.resolve(&parent_id, depth + 1, visited) {
            Ok(path) => path,
            Err(ConnectorError::NotFound(_)) => {
                return Err(ConnectorError::MissingParent {
                    id: id.to_string(),
                    parent: parent_id,
                })
            }
            Err(other) => return Err(other),
        };

        let path = parent_path.append(display_name);
        trace!(id, path = %path, "Resolved container path");

        if let Some(entry) = self.cache.get_mut(id) {
            entry.path = Some(path.clone());
        }

        Ok(path)
    }

    /// Resolves every cached container, aggregating per-folder failures.
    pub fn populate_paths(&mut self) -> Result<(), MultiError> {
        let ids: Vec<String> = self.cache.keys().cloned().collect();
        let mut errors = MultiError::new();

        for id in ids {
            if let Err(err) = self.id_to_path(&id) {
                errors.wrap_and_push(format!("resolving container {id}"), err.into());
            }
        }

        errors.into_result()
    }

    /// Reverse lookup: the ID of the container whose resolved path's
    /// escaped form equals `path`. Used by restore to find destinations.
    pub fn path_in_cache(&self, path: &str) -> Option<&str> {
        self.cache
            .values()
            .find(|c| {
                c.path
                    .as_ref()
                    .map(|p| p.to_string() == path)
                    .unwrap_or(false)
            })
            .map(|c| c.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&Container> {
        self.cache.get(id)
    }

    /// All cached containers, in no particular order.
    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.cache.values()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
