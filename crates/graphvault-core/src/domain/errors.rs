//! Domain error types
//!
//! Validation failures for paths and entities, plus the [`MultiError`]
//! aggregate used to carry per-item read failures without halting a
//! whole enumeration.

use std::fmt::{self, Display, Formatter};

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A required value was empty or absent
    #[error("missing required value: {0}")]
    MissingValue(&'static str),

    /// Service string not recognised
    #[error("unknown service {0:?}")]
    UnknownService(String),

    /// Category string not recognised
    #[error("unknown category {0:?}")]
    UnknownCategory(String),

    /// Service/category pair outside the allow-table
    #[error("unsupported service/category combination {service}/{category}")]
    UnsupportedCombination {
        /// The service half of the pair
        service: String,
        /// The category half of the pair
        category: String,
    },

    /// A resource path had too few elements to be valid
    #[error("path requires at least one element past the {0}-element prefix")]
    PathTooShort(usize),

    /// A string could not be parsed as a resource path
    #[error("malformed resource path: {0}")]
    MalformedPath(String),

    /// Generic validation failure
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Two metadata items of the same name within one category.
    #[error("duplicate metadata item {0:?} in category")]
    MetadataConflict(String),
}

/// An append-only aggregate of independent failures.
///
/// Read errors from remote enumeration are collected here per collection
/// and surfaced in the operation results rather than aborting the run.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<anyhow::Error>,
}

impl MultiError {
    /// Creates an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an error as-is.
    pub fn push(&mut self, err: anyhow::Error) {
        self.errors.push(err);
    }

    /// Appends an error wrapped with identifying context, e.g. the item
    /// or folder ID that produced it.
    pub fn wrap_and_push(&mut self, identifier: impl Display, err: anyhow::Error) {
        self.errors.push(err.context(identifier.to_string()));
    }

    /// Number of collected errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Borrow the collected errors.
    pub fn errors(&self) -> &[anyhow::Error] {
        &self.errors
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), MultiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Folds another aggregate into this one.
    pub fn extend(&mut self, other: MultiError) {
        self.errors.extend(other.errors);
    }
}

impl Display for MultiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} error(s) occurred:", self.errors.len())?;
        for (idx, err) in self.errors.iter().enumerate() {
            writeln!(f, "\tErr {}: {:#}", idx + 1, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}
