//! Canonical resource paths
//!
//! Every location in the backup namespace is addressed by a [`RepoPath`]:
//! an ordered sequence `tenant / service / owner / category / folders... [/ item]`.
//! Constructors are the only way to obtain a `RepoPath`, which makes an
//! invalid service/category combination unrepresentable.
//!
//! Segments are escaped before joining (`\` becomes `\\`, `/` becomes `\/`)
//! so arbitrary display names survive the round trip through the string
//! form. Equality and prefix matching operate on the escaped form.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use super::errors::DomainError;

/// Number of fixed elements before folder segments begin.
pub const PREFIX_LEN: usize = 4;

/// Reserved folder name holding per-category backup metadata.
pub const METADATA_DIR: &str = ".meta";

/// Hex characters kept from the SHA-1 digest of an escaped path.
pub const SHORT_REF_LEN: usize = 12;

// ============================================================================
// Service and category enums
// ============================================================================

/// The remote service a path belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Exchange,
    OneDrive,
    SharePoint,
}

impl Service {
    /// Lowercase wire/path form of the service name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Exchange => "exchange",
            Service::OneDrive => "onedrive",
            Service::SharePoint => "sharepoint",
        }
    }
}

impl Display for Service {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exchange" => Ok(Service::Exchange),
            "onedrive" => Ok(Service::OneDrive),
            "sharepoint" => Ok(Service::SharePoint),
            other => Err(DomainError::UnknownService(other.to_string())),
        }
    }
}

/// The data category a path belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Email,
    Contacts,
    Events,
    Files,
    Libraries,
    Lists,
}

impl Category {
    /// Lowercase wire/path form of the category name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Email => "email",
            Category::Contacts => "contacts",
            Category::Events => "events",
            Category::Files => "files",
            Category::Libraries => "libraries",
            Category::Lists => "lists",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Category::Email),
            "contacts" => Ok(Category::Contacts),
            "events" => Ok(Category::Events),
            "files" => Ok(Category::Files),
            "libraries" => Ok(Category::Libraries),
            "lists" => Ok(Category::Lists),
            other => Err(DomainError::UnknownCategory(other.to_string())),
        }
    }
}

/// Allow-table of valid service/category pairs.
pub fn valid_combination(service: Service, category: Category) -> bool {
    matches!(
        (service, category),
        (
            Service::Exchange,
            Category::Email | Category::Contacts | Category::Events
        ) | (Service::OneDrive, Category::Files)
            | (Service::SharePoint, Category::Libraries | Category::Lists)
    )
}

// ============================================================================
// Segment escaping
// ============================================================================

/// Escapes a raw segment for embedding in a path string.
pub fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            other => out.push(other),
        }
    }
    out
}

/// Splits an escaped path string into raw (unescaped) segments.
///
/// A trailing lone backslash is malformed, as is any escape of a
/// character other than `/` or `\`.
pub fn split_escaped(s: &str) -> Result<Vec<String>, DomainError> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\\') => current.push('\\'),
                Some('/') => current.push('/'),
                Some(other) => {
                    return Err(DomainError::MalformedPath(format!(
                        "invalid escape sequence \\{other} in {s:?}"
                    )))
                }
                None => {
                    return Err(DomainError::MalformedPath(format!(
                        "trailing backslash in {s:?}"
                    )))
                }
            },
            '/' => {
                segments.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }

    segments.push(current);
    Ok(segments)
}

fn short_ref_of(escaped: &str) -> String {
    let digest = Sha1::digest(escaped.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(SHORT_REF_LEN);
    hex
}

// ============================================================================
// PathBuilder
// ============================================================================

/// Unvalidated ordered segment accumulator.
///
/// Builders carry raw segments; escaping happens only when rendering the
/// string form. A builder is promoted to a [`RepoPath`] through
/// [`RepoPath::from_builder`], which is where validation lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PathBuilder {
    elements: Vec<String>,
}

impl PathBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder from raw (unescaped) segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            elements: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses an escaped path string into a builder of raw segments.
    pub fn from_escaped(s: &str) -> Result<Self, DomainError> {
        Ok(Self {
            elements: split_escaped(s)?,
        })
    }

    /// Appends one raw segment, returning the extended builder.
    #[must_use]
    pub fn append(mut self, segment: impl Into<String>) -> Self {
        self.elements.push(segment.into());
        self
    }

    /// Raw segments in order.
    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    /// Last raw segment, if any.
    pub fn last(&self) -> Option<&str> {
        self.elements.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Builder for the parent location (drops the last segment).
    #[must_use]
    pub fn dir(&self) -> Self {
        let mut elements = self.elements.clone();
        elements.pop();
        Self { elements }
    }

    /// Escaped join of the half-open segment range `[start, end)`.
    pub fn join_range(&self, start: usize, end: usize) -> String {
        self.elements[start..end.min(self.elements.len())]
            .iter()
            .map(|s| escape_segment(s))
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Stable short digest of the escaped string form.
    pub fn short_ref(&self) -> String {
        short_ref_of(&self.to_string())
    }

    /// True when `prefix`'s segments lead this builder's segments.
    ///
    /// Comparison is segment-wise on raw values, which is equivalent to
    /// prefix matching on the escaped form.
    pub fn has_prefix(&self, prefix: &PathBuilder) -> bool {
        prefix.elements.len() <= self.elements.len()
            && self.elements[..prefix.elements.len()] == prefix.elements[..]
    }
}

impl Display for PathBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join_range(0, self.elements.len()))
    }
}

// ============================================================================
// RepoPath
// ============================================================================

/// A validated location in the backup namespace.
///
/// Layout: `elements[0]` tenant, `elements[1]` service, `elements[2]`
/// resource owner, `elements[3]` category, then folder segments and,
/// when `has_item`, a final item ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoPath {
    elements: Vec<String>,
    service: Service,
    category: Category,
    has_item: bool,
}

impl RepoPath {
    /// Builds a path from its parts.
    ///
    /// `folders` holds the folder chain; `item` appends a final item ID
    /// and marks the path as referring to an item. A valid path needs at
    /// least one element past the four-element prefix.
    pub fn build(
        tenant: &str,
        owner: &str,
        service: Service,
        category: Category,
        folders: &PathBuilder,
        item: Option<&str>,
    ) -> Result<Self, DomainError> {
        if tenant.is_empty() {
            return Err(DomainError::MissingValue("tenant"));
        }
        if owner.is_empty() {
            return Err(DomainError::MissingValue("resource owner"));
        }
        if !valid_combination(service, category) {
            return Err(DomainError::UnsupportedCombination {
                service: service.to_string(),
                category: category.to_string(),
            });
        }
        if folders.is_empty() && item.is_none() {
            return Err(DomainError::PathTooShort(PREFIX_LEN));
        }
        if let Some(item) = item {
            if item.is_empty() {
                return Err(DomainError::MissingValue("item"));
            }
        }

        let mut elements = Vec::with_capacity(PREFIX_LEN + folders.len() + 1);
        elements.push(tenant.to_string());
        elements.push(service.as_str().to_string());
        elements.push(owner.to_string());
        elements.push(category.as_str().to_string());
        elements.extend(folders.elements().iter().cloned());
        if let Some(item) = item {
            elements.push(item.to_string());
        }

        Ok(Self {
            elements,
            service,
            category,
            has_item: item.is_some(),
        })
    }

    /// Promotes a builder whose segments already form a full path.
    pub fn from_builder(builder: &PathBuilder, is_item: bool) -> Result<Self, DomainError> {
        let elements = builder.elements();
        if elements.len() <= PREFIX_LEN {
            return Err(DomainError::PathTooShort(PREFIX_LEN));
        }

        let service: Service = elements[1].parse()?;
        let category: Category = elements[3].parse()?;

        let folders = PathBuilder::from_segments(
            elements[PREFIX_LEN..elements.len() - usize::from(is_item)]
                .iter()
                .cloned(),
        );
        let item = is_item.then(|| elements[elements.len() - 1].as_str());

        Self::build(&elements[0], &elements[2], service, category, &folders, item)
    }

    /// Parses an escaped path string.
    pub fn from_escaped(s: &str, is_item: bool) -> Result<Self, DomainError> {
        Self::from_builder(&PathBuilder::from_escaped(s)?, is_item)
    }

    /// The reserved per-category metadata location.
    pub fn metadata(
        tenant: &str,
        owner: &str,
        service: Service,
        category: Category,
    ) -> Result<Self, DomainError> {
        Self::build(
            tenant,
            owner,
            service,
            category,
            &PathBuilder::new().append(METADATA_DIR),
            None,
        )
    }

    pub fn tenant(&self) -> &str {
        &self.elements[0]
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn resource_owner(&self) -> &str {
        &self.elements[2]
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Escaped join of the folder segments.
    pub fn folder(&self) -> String {
        let end = self.elements.len() - usize::from(self.has_item);
        self.elements[PREFIX_LEN..end]
            .iter()
            .map(|s| escape_segment(s))
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Raw folder segments.
    pub fn folder_segments(&self) -> &[String] {
        let end = self.elements.len() - usize::from(self.has_item);
        &self.elements[PREFIX_LEN..end]
    }

    /// The item ID when this path refers to an item.
    pub fn item(&self) -> Option<&str> {
        self.has_item
            .then(|| self.elements[self.elements.len() - 1].as_str())
    }

    pub fn is_item(&self) -> bool {
        self.has_item
    }

    /// True when this is the reserved metadata location for its category.
    pub fn is_metadata(&self) -> bool {
        self.folder_segments().first().map(String::as_str) == Some(METADATA_DIR)
    }

    /// The containing folder path.
    ///
    /// Dropping below the minimum one-element suffix is an error.
    pub fn dir(&self) -> Result<Self, DomainError> {
        if self.elements.len() <= PREFIX_LEN + 1 {
            return Err(DomainError::PathTooShort(PREFIX_LEN));
        }

        let mut elements = self.elements.clone();
        elements.pop();
        Ok(Self {
            elements,
            service: self.service,
            category: self.category,
            has_item: false,
        })
    }

    /// Extends the path by one segment.
    pub fn append(&self, segment: &str, is_item: bool) -> Result<Self, DomainError> {
        if self.has_item {
            return Err(DomainError::ValidationFailed(
                "cannot append to an item path".to_string(),
            ));
        }
        if segment.is_empty() {
            return Err(DomainError::MissingValue("segment"));
        }

        let mut elements = self.elements.clone();
        elements.push(segment.to_string());
        Ok(Self {
            elements,
            service: self.service,
            category: self.category,
            has_item: is_item,
        })
    }

    /// All raw elements, prefix included.
    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    /// Copy of this path's segments as an unvalidated builder.
    pub fn to_builder(&self) -> PathBuilder {
        PathBuilder::from_segments(self.elements.iter().cloned())
    }

    /// Stable short digest of the escaped string form, used as the
    /// parent-ref key in backup details.
    pub fn short_ref(&self) -> String {
        short_ref_of(&self.to_string())
    }
}

impl Display for RepoPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let escaped = self
            .elements
            .iter()
            .map(|s| escape_segment(s))
            .collect::<Vec<_>>()
            .join("/");
        f.write_str(&escaped)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mail_path(folders: &[&str], item: Option<&str>) -> RepoPath {
        RepoPath::build(
            "tid",
            "user@example.com",
            Service::Exchange,
            Category::Email,
            &PathBuilder::from_segments(folders.iter().copied()),
            item,
        )
        .unwrap()
    }

    mod service_category {
        use super::*;

        #[test]
        fn test_round_trip_strings() {
            for svc in [Service::Exchange, Service::OneDrive, Service::SharePoint] {
                assert_eq!(svc.as_str().parse::<Service>().unwrap(), svc);
            }
            for cat in [
                Category::Email,
                Category::Contacts,
                Category::Events,
                Category::Files,
                Category::Libraries,
                Category::Lists,
            ] {
                assert_eq!(cat.as_str().parse::<Category>().unwrap(), cat);
            }
        }

        #[test]
        fn test_unknown_strings_fail() {
            assert!("teams".parse::<Service>().is_err());
            assert!("chats".parse::<Category>().is_err());
        }

        #[test]
        fn test_allow_table() {
            assert!(valid_combination(Service::Exchange, Category::Email));
            assert!(valid_combination(Service::Exchange, Category::Contacts));
            assert!(valid_combination(Service::Exchange, Category::Events));
            assert!(valid_combination(Service::OneDrive, Category::Files));
            assert!(valid_combination(Service::SharePoint, Category::Libraries));
            assert!(valid_combination(Service::SharePoint, Category::Lists));

            assert!(!valid_combination(Service::Exchange, Category::Files));
            assert!(!valid_combination(Service::OneDrive, Category::Email));
            assert!(!valid_combination(Service::SharePoint, Category::Events));
        }
    }

    mod escaping {
        use super::*;

        #[test]
        fn test_escape_plain_segment_unchanged() {
            assert_eq!(escape_segment("Inbox"), "Inbox");
        }

        #[test]
        fn test_escape_special_characters() {
            assert_eq!(escape_segment("a/b"), "a\\/b");
            assert_eq!(escape_segment("a\\b"), "a\\\\b");
            assert_eq!(escape_segment("a\\/b"), "a\\\\\\/b");
        }

        #[test]
        fn test_split_round_trip() {
            let segments = vec!["plain", "with/slash", "with\\backslash", "both\\/mixed"];
            let joined = segments
                .iter()
                .map(|s| escape_segment(s))
                .collect::<Vec<_>>()
                .join("/");

            let split = split_escaped(&joined).unwrap();
            assert_eq!(split, segments);
        }

        #[test]
        fn test_split_rejects_bad_escapes() {
            assert!(split_escaped("a\\b").is_err());
            assert!(split_escaped("trailing\\").is_err());
        }
    }

    mod repo_path {
        use super::*;

        #[test]
        fn test_build_folder_path() {
            let p = mail_path(&["Inbox", "Sub"], None);
            assert_eq!(p.tenant(), "tid");
            assert_eq!(p.service(), Service::Exchange);
            assert_eq!(p.resource_owner(), "user@example.com");
            assert_eq!(p.category(), Category::Email);
            assert_eq!(p.folder(), "Inbox/Sub");
            assert_eq!(p.item(), None);
            assert_eq!(p.to_string(), "tid/exchange/user@example.com/email/Inbox/Sub");
        }

        #[test]
        fn test_build_item_path() {
            let p = mail_path(&["Inbox"], Some("m1"));
            assert!(p.is_item());
            assert_eq!(p.item(), Some("m1"));
            assert_eq!(p.folder(), "Inbox");
        }

        #[test]
        fn test_empty_tenant_or_owner_rejected() {
            let folders = PathBuilder::new().append("Inbox");
            assert!(RepoPath::build(
                "",
                "u",
                Service::Exchange,
                Category::Email,
                &folders,
                None
            )
            .is_err());
            assert!(RepoPath::build(
                "t",
                "",
                Service::Exchange,
                Category::Email,
                &folders,
                None
            )
            .is_err());
        }

        #[test]
        fn test_prefix_only_rejected() {
            let err = RepoPath::build(
                "t",
                "u",
                Service::Exchange,
                Category::Email,
                &PathBuilder::new(),
                None,
            )
            .unwrap_err();
            assert_eq!(err, DomainError::PathTooShort(PREFIX_LEN));
        }

        #[test]
        fn test_invalid_combination_rejected() {
            let folders = PathBuilder::new().append("Docs");
            let err = RepoPath::build(
                "t",
                "u",
                Service::Exchange,
                Category::Files,
                &folders,
                None,
            )
            .unwrap_err();
            assert!(matches!(err, DomainError::UnsupportedCombination { .. }));
        }

        #[test]
        fn test_string_round_trip_with_hostile_names() {
            let p = RepoPath::build(
                "t",
                "u",
                Service::OneDrive,
                Category::Files,
                &PathBuilder::new().append("a/b").append("c\\d"),
                Some("file.txt"),
            )
            .unwrap();

            let reparsed = RepoPath::from_escaped(&p.to_string(), true).unwrap();
            assert_eq!(reparsed, p);
            assert_eq!(reparsed.folder_segments(), &["a/b", "c\\d"]);
        }

        #[test]
        fn test_dir_strips_item_then_folders() {
            let p = mail_path(&["Inbox", "Sub"], Some("m1"));

            let folder = p.dir().unwrap();
            assert!(!folder.is_item());
            assert_eq!(folder.folder(), "Inbox/Sub");

            let parent = folder.dir().unwrap();
            assert_eq!(parent.folder(), "Inbox");

            assert!(parent.dir().is_err());
        }

        #[test]
        fn test_append() {
            let p = mail_path(&["Inbox"], None);
            let item = p.append("m9", true).unwrap();
            assert_eq!(item.item(), Some("m9"));
            assert!(item.append("x", false).is_err());
        }

        #[test]
        fn test_metadata_path() {
            let p = RepoPath::metadata("t", "u", Service::Exchange, Category::Email).unwrap();
            assert!(p.is_metadata());
            assert_eq!(p.to_string(), "t/exchange/u/email/.meta");

            let item = mail_path(&["Inbox"], None);
            assert!(!item.is_metadata());
        }

        #[test]
        fn test_short_ref_is_stable_and_short() {
            let a = mail_path(&["Inbox"], Some("m1"));
            let b = mail_path(&["Inbox"], Some("m1"));
            let c = mail_path(&["Inbox"], Some("m2"));

            assert_eq!(a.short_ref(), b.short_ref());
            assert_ne!(a.short_ref(), c.short_ref());
            assert_eq!(a.short_ref().len(), SHORT_REF_LEN);
            assert!(a.short_ref().chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    mod builder {
        use super::*;

        #[test]
        fn test_append_and_display() {
            let b = PathBuilder::new().append("a").append("b/c");
            assert_eq!(b.to_string(), "a/b\\/c");
            assert_eq!(b.len(), 2);
        }

        #[test]
        fn test_dir() {
            let b = PathBuilder::new().append("a").append("b");
            assert_eq!(b.dir().elements(), &["a".to_string()]);
            assert!(PathBuilder::new().dir().is_empty());
        }

        #[test]
        fn test_has_prefix() {
            let base = PathBuilder::new().append("Inbox").append("Sub");
            let prefix = PathBuilder::new().append("Inbox");
            let other = PathBuilder::new().append("Archive");

            assert!(base.has_prefix(&prefix));
            assert!(base.has_prefix(&base));
            assert!(!base.has_prefix(&other));
            assert!(!prefix.has_prefix(&base));
        }

        #[test]
        fn test_join_range() {
            let b = PathBuilder::from_segments(["t", "exchange", "u", "email", "Inbox"]);
            assert_eq!(b.join_range(4, 5), "Inbox");
            assert_eq!(b.join_range(0, 2), "t/exchange");
        }
    }
}
