//! Selectors: reducing backup details to a chosen subset
//!
//! A [`Selector`] carries three groups of [`Scope`]s. During reduction
//! an item entry passes when at least one include scope matches (or
//! there are no includes), no exclude scope matches, and every filter
//! scope matches. Matching is category-specific: mail scopes compare
//! senders, subjects, and received times; folder targets match by
//! escaped-segment prefix.

use chrono::{DateTime, Utc};

use crate::domain::details::{DetailsEntry, DetailsModel};
use crate::domain::item::ItemInfo;
use crate::domain::path::{Category, PathBuilder, RepoPath, Service};

/// Wildcard target matching every value.
pub const ANY_TARGET: &str = "*";

/// Convenience constructor for a wildcard target list.
pub fn any() -> Vec<String> {
    vec![ANY_TARGET.to_string()]
}

// ============================================================================
// Predicates and scopes
// ============================================================================

/// Field a scope predicate inspects on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKey {
    ResourceOwner,
    Folder,
    ItemId,
    /// Matches either the raw item ID or the entry short-ref.
    ItemRef,
    ShortRef,
    Sender,
    Subject,
    Received,
    ItemName,
}

/// Predicate applied to one entry field.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Passes when the value equals any target; `*` passes everything.
    /// Folder targets match by escaped-segment prefix instead.
    Identity(Vec<String>),
    /// Always passes.
    Any,
    /// Never passes.
    None,
    /// Timestamp strictly before the bound.
    Before(DateTime<Utc>),
    /// Timestamp strictly after the bound.
    After(DateTime<Utc>),
    /// Substring match.
    Contains(String),
    /// String-prefix match.
    Prefix(String),
}

impl Predicate {
    fn matches_str(&self, value: &str) -> bool {
        match self {
            Predicate::Identity(targets) => targets
                .iter()
                .any(|t| t == ANY_TARGET || t == value),
            Predicate::Any => true,
            Predicate::None => false,
            Predicate::Contains(needle) => value.contains(needle.as_str()),
            Predicate::Prefix(prefix) => value.starts_with(prefix.as_str()),
            // Temporal predicates only apply to timestamp fields.
            Predicate::Before(_) | Predicate::After(_) => false,
        }
    }

    fn matches_time(&self, value: DateTime<Utc>) -> bool {
        match self {
            Predicate::Before(bound) => value < *bound,
            Predicate::After(bound) => value > *bound,
            Predicate::Any => true,
            Predicate::None => false,
            _ => false,
        }
    }

    fn matches_folder(&self, folder: &PathBuilder) -> bool {
        match self {
            Predicate::Identity(targets) => targets.iter().any(|t| {
                t == ANY_TARGET
                    || PathBuilder::from_escaped(t)
                        .map(|prefix| folder.has_prefix(&prefix))
                        .unwrap_or(false)
            }),
            Predicate::Any => true,
            Predicate::None => false,
            Predicate::Prefix(prefix) => folder.to_string().starts_with(prefix.as_str()),
            _ => false,
        }
    }
}

/// One matchable unit: a category restriction plus field predicates.
///
/// A scope with no category applies to every category (owner-level
/// scopes). All predicates must pass for the scope to match.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub category: Option<Category>,
    pub predicates: Vec<(ScopeKey, Predicate)>,
}

impl Scope {
    fn matches(&self, ctx: &EntryContext<'_>) -> bool {
        if let Some(category) = self.category {
            if category != ctx.category {
                return false;
            }
        }

        self.predicates.iter().all(|(key, pred)| match key {
            ScopeKey::ResourceOwner => pred.matches_str(ctx.owner),
            ScopeKey::Folder => pred.matches_folder(&ctx.folder),
            ScopeKey::ItemId => pred.matches_str(ctx.item_id),
            ScopeKey::ItemRef => {
                pred.matches_str(ctx.item_id) || pred.matches_str(ctx.short_ref)
            }
            ScopeKey::ShortRef => pred.matches_str(ctx.short_ref),
            ScopeKey::Sender => ctx
                .exchange()
                .map(|info| pred.matches_str(&info.sender))
                .unwrap_or(false),
            ScopeKey::Subject => ctx
                .exchange()
                .map(|info| pred.matches_str(&info.subject))
                .unwrap_or(false),
            ScopeKey::Received => ctx
                .exchange()
                .map(|info| pred.matches_time(info.received))
                .unwrap_or(false),
            ScopeKey::ItemName => match ctx.info {
                ItemInfo::OneDrive(info) => pred.matches_str(&info.item_name),
                ItemInfo::SharePoint(info) => pred.matches_str(&info.item_name),
                ItemInfo::Exchange(_) => false,
            },
        })
    }
}

/// Parsed view of one details entry during reduction.
struct EntryContext<'a> {
    category: Category,
    owner: &'a str,
    folder: PathBuilder,
    item_id: &'a str,
    short_ref: &'a str,
    info: &'a ItemInfo,
}

impl<'a> EntryContext<'a> {
    fn from_entry(entry: &'a DetailsEntry, path: &'a RepoPath) -> Option<Self> {
        Some(Self {
            category: path.category(),
            owner: path.resource_owner(),
            folder: PathBuilder::from_segments(path.folder_segments().iter().cloned()),
            item_id: path.item()?,
            short_ref: &entry.short_ref,
            info: entry.info.as_ref()?,
        })
    }

    fn exchange(&self) -> Option<&crate::domain::item::ExchangeInfo> {
        match self.info {
            ItemInfo::Exchange(info) => Some(info),
            _ => None,
        }
    }
}

// ============================================================================
// Scope constructors
// ============================================================================

/// Scope over whole resource owners, matching every category.
pub fn owners(targets: Vec<String>) -> Scope {
    Scope {
        category: None,
        predicates: vec![(ScopeKey::ResourceOwner, Predicate::Identity(targets))],
    }
}

fn container_scope(
    category: Category,
    owner_targets: Vec<String>,
    folder_targets: Vec<String>,
    item_targets: Vec<String>,
) -> Scope {
    Scope {
        category: Some(category),
        predicates: vec![
            (ScopeKey::ResourceOwner, Predicate::Identity(owner_targets)),
            (ScopeKey::Folder, Predicate::Identity(folder_targets)),
            // Item targets accept either raw item IDs or short-refs.
            (ScopeKey::ItemRef, Predicate::Identity(item_targets)),
        ],
    }
}

/// Mail items by owner, folder prefix, and item ID.
pub fn mails(
    owner_targets: Vec<String>,
    folder_targets: Vec<String>,
    item_targets: Vec<String>,
) -> Scope {
    container_scope(Category::Email, owner_targets, folder_targets, item_targets)
}

/// Contact items by owner, folder prefix, and item ID.
pub fn contacts(
    owner_targets: Vec<String>,
    folder_targets: Vec<String>,
    item_targets: Vec<String>,
) -> Scope {
    container_scope(
        Category::Contacts,
        owner_targets,
        folder_targets,
        item_targets,
    )
}

/// Event items by owner, folder prefix, and item ID.
pub fn events(
    owner_targets: Vec<String>,
    folder_targets: Vec<String>,
    item_targets: Vec<String>,
) -> Scope {
    container_scope(Category::Events, owner_targets, folder_targets, item_targets)
}

/// Drive files by owner, folder prefix, and item ID.
pub fn files(
    owner_targets: Vec<String>,
    folder_targets: Vec<String>,
    item_targets: Vec<String>,
) -> Scope {
    container_scope(Category::Files, owner_targets, folder_targets, item_targets)
}

/// Mail items whose ID or short-ref is in the target set.
pub fn mail_refs(targets: Vec<String>) -> Scope {
    Scope {
        category: Some(Category::Email),
        predicates: vec![(ScopeKey::ShortRef, Predicate::Identity(targets))],
    }
}

/// Filter: mail subject contains the given string.
pub fn mail_subject(substring: impl Into<String>) -> Scope {
    Scope {
        category: Some(Category::Email),
        predicates: vec![(ScopeKey::Subject, Predicate::Contains(substring.into()))],
    }
}

/// Filter: mail sender equals the given address.
pub fn mail_sender(sender: impl Into<String>) -> Scope {
    Scope {
        category: Some(Category::Email),
        predicates: vec![(ScopeKey::Sender, Predicate::Identity(vec![sender.into()]))],
    }
}

/// Filter: mail received strictly before the bound.
pub fn mail_received_before(bound: DateTime<Utc>) -> Scope {
    Scope {
        category: Some(Category::Email),
        predicates: vec![(ScopeKey::Received, Predicate::Before(bound))],
    }
}

/// Filter: mail received strictly after the bound.
pub fn mail_received_after(bound: DateTime<Utc>) -> Scope {
    Scope {
        category: Some(Category::Email),
        predicates: vec![(ScopeKey::Received, Predicate::After(bound))],
    }
}

/// Filter: event subject contains the given string.
pub fn event_subject(substring: impl Into<String>) -> Scope {
    Scope {
        category: Some(Category::Events),
        predicates: vec![(ScopeKey::Subject, Predicate::Contains(substring.into()))],
    }
}

/// Filter: file or library item name contains the given string.
pub fn item_name_contains(substring: impl Into<String>) -> Scope {
    Scope {
        category: None,
        predicates: vec![(ScopeKey::ItemName, Predicate::Contains(substring.into()))],
    }
}

// ============================================================================
// Selector
// ============================================================================

/// The reducible request: which tenant and service, and which scopes.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub tenant: String,
    pub service: Service,
    includes: Vec<Scope>,
    excludes: Vec<Scope>,
    filters: Vec<Scope>,
}

impl Selector {
    pub fn new(tenant: impl Into<String>, service: Service) -> Self {
        Self {
            tenant: tenant.into(),
            service,
            includes: Vec::new(),
            excludes: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn include(&mut self, scope: Scope) -> &mut Self {
        self.includes.push(scope);
        self
    }

    pub fn exclude(&mut self, scope: Scope) -> &mut Self {
        self.excludes.push(scope);
        self
    }

    pub fn filter(&mut self, scope: Scope) -> &mut Self {
        self.filters.push(scope);
        self
    }

    pub fn includes(&self) -> &[Scope] {
        &self.includes
    }

    /// Resource owners named by include scopes; `*` targets collapse to
    /// a single wildcard entry.
    pub fn included_owners(&self) -> Vec<String> {
        let mut out = Vec::new();
        for scope in &self.includes {
            for (key, pred) in &scope.predicates {
                if *key != ScopeKey::ResourceOwner {
                    continue;
                }
                if let Predicate::Identity(targets) = pred {
                    for t in targets {
                        if !out.contains(t) {
                            out.push(t.clone());
                        }
                    }
                }
            }
        }
        out
    }

    /// Categories named by include scopes; owner-level scopes (no
    /// category) expand to every category valid for the service.
    pub fn included_categories(&self) -> Vec<Category> {
        let all = [
            Category::Email,
            Category::Contacts,
            Category::Events,
            Category::Files,
            Category::Libraries,
            Category::Lists,
        ];

        let mut out = Vec::new();
        for scope in &self.includes {
            match scope.category {
                Some(category) => {
                    if !out.contains(&category) {
                        out.push(category);
                    }
                }
                None => {
                    for category in all {
                        if crate::domain::path::valid_combination(self.service, category)
                            && !out.contains(&category)
                        {
                            out.push(category);
                        }
                    }
                }
            }
        }
        out
    }

    /// Reduces a details document to the entries this selector names.
    ///
    /// Folder scaffolding entries are dropped; the result contains item
    /// entries only. Reduction is idempotent.
    pub fn reduce(&self, details: &DetailsModel) -> DetailsModel {
        let mut entries = Vec::new();

        for entry in details.items() {
            let Ok(path) = RepoPath::from_escaped(&entry.repo_ref, true) else {
                continue;
            };
            if path.tenant() != self.tenant || path.service() != self.service {
                continue;
            }
            let Some(ctx) = EntryContext::from_entry(entry, &path) else {
                continue;
            };

            let included =
                self.includes.is_empty() || self.includes.iter().any(|s| s.matches(&ctx));
            let excluded = self.excludes.iter().any(|s| s.matches(&ctx));
            let filtered = self.filters.iter().all(|s| s.matches(&ctx));

            if included && !excluded && filtered {
                entries.push(entry.clone());
            }
        }

        DetailsModel { entries }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::details::DetailsEntry;
    use crate::domain::item::ExchangeInfo;
    use crate::domain::path::PathBuilder;

    const TENANT: &str = "tid";

    fn mail_entry(
        owner: &str,
        folder: &str,
        item: &str,
        sender: &str,
        subject: &str,
        received: &str,
    ) -> DetailsEntry {
        let path = RepoPath::build(
            TENANT,
            owner,
            Service::Exchange,
            Category::Email,
            &PathBuilder::new().append(folder),
            Some(item),
        )
        .unwrap();

        DetailsEntry {
            repo_ref: path.to_string(),
            short_ref: path.short_ref(),
            parent_ref: path.dir().unwrap().short_ref(),
            info: Some(ItemInfo::Exchange(ExchangeInfo {
                sender: sender.to_string(),
                subject: subject.to_string(),
                received: received.parse().unwrap(),
            })),
            folder: None,
        }
    }

    fn details_fixture() -> DetailsModel {
        DetailsModel {
            entries: vec![
                mail_entry(
                    "u1",
                    "Inbox",
                    "m1",
                    "a-person",
                    "foo",
                    "2026-01-01T00:00:00Z",
                ),
                mail_entry(
                    "u1",
                    "Inbox",
                    "m2",
                    "a-person",
                    "bar",
                    "2026-02-01T00:00:00Z",
                ),
                mail_entry(
                    "u2",
                    "Archive",
                    "m3",
                    "b-person",
                    "foobar",
                    "2026-03-01T00:00:00Z",
                ),
            ],
        }
    }

    fn item_ids(details: &DetailsModel) -> Vec<String> {
        details
            .items()
            .map(|e| {
                RepoPath::from_escaped(&e.repo_ref, true)
                    .unwrap()
                    .item()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_no_includes_matches_all() {
        let sel = Selector::new(TENANT, Service::Exchange);
        let reduced = sel.reduce(&details_fixture());
        assert_eq!(reduced.entries.len(), 3);
    }

    #[test]
    fn test_include_all_mail() {
        let mut sel = Selector::new(TENANT, Service::Exchange);
        sel.include(mails(any(), any(), any()));

        let reduced = sel.reduce(&details_fixture());
        assert_eq!(item_ids(&reduced), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_filter_by_subject() {
        let mut sel = Selector::new(TENANT, Service::Exchange);
        sel.filter(mail_subject("foo"));

        let reduced = sel.reduce(&details_fixture());
        // Contains-match: both "foo" and "foobar" qualify.
        assert_eq!(item_ids(&reduced), vec!["m1", "m3"]);
    }

    #[test]
    fn test_filter_subject_single_match() {
        let mut sel = Selector::new(TENANT, Service::Exchange);
        sel.filter(mail_subject("bar"));
        sel.filter(mail_sender("a-person"));

        let reduced = sel.reduce(&details_fixture());
        assert_eq!(item_ids(&reduced), vec!["m2"]);
    }

    #[test]
    fn test_exclude_by_short_ref() {
        let details = details_fixture();
        let excluded_ref = details.entries[1].short_ref.clone();

        let mut sel = Selector::new(TENANT, Service::Exchange);
        sel.filter(mail_sender("a-person"));
        sel.exclude(mail_refs(vec![excluded_ref]));

        let reduced = sel.reduce(&details);
        assert_eq!(item_ids(&reduced), vec!["m1"]);
    }

    #[test]
    fn test_received_window() {
        let mut sel = Selector::new(TENANT, Service::Exchange);
        sel.filter(mail_received_before("2026-01-15T00:00:00Z".parse().unwrap()));

        let reduced = sel.reduce(&details_fixture());
        assert_eq!(item_ids(&reduced), vec!["m1"]);

        let mut sel = Selector::new(TENANT, Service::Exchange);
        sel.filter(mail_received_after("2026-02-15T00:00:00Z".parse().unwrap()));

        let reduced = sel.reduce(&details_fixture());
        assert_eq!(item_ids(&reduced), vec!["m3"]);
    }

    #[test]
    fn test_include_by_item_id() {
        let mut sel = Selector::new(TENANT, Service::Exchange);
        sel.include(mails(any(), any(), vec!["m1".to_string()]));

        let reduced = sel.reduce(&details_fixture());
        assert_eq!(item_ids(&reduced), vec!["m1"]);
    }

    #[test]
    fn test_folder_prefix_matching() {
        let mut sel = Selector::new(TENANT, Service::Exchange);
        sel.include(mails(any(), vec!["Inbox".to_string()], any()));

        let reduced = sel.reduce(&details_fixture());
        assert_eq!(item_ids(&reduced), vec!["m1", "m2"]);
    }

    #[test]
    fn test_owner_scope_spans_categories() {
        let mut sel = Selector::new(TENANT, Service::Exchange);
        sel.include(owners(vec!["u1".to_string()]));

        let reduced = sel.reduce(&details_fixture());
        assert_eq!(item_ids(&reduced), vec!["m1", "m2"]);

        assert_eq!(
            sel.included_categories(),
            vec![Category::Email, Category::Contacts, Category::Events]
        );
    }

    #[test]
    fn test_conflicting_filters_yield_nothing() {
        let mut sel = Selector::new(TENANT, Service::Exchange);
        sel.filter(event_subject("foo"));
        sel.filter(mail_subject("foo"));

        let reduced = sel.reduce(&details_fixture());
        assert!(reduced.entries.is_empty());
    }

    #[test]
    fn test_wrong_tenant_excluded() {
        let mut sel = Selector::new("other-tenant", Service::Exchange);
        sel.include(mails(any(), any(), any()));

        let reduced = sel.reduce(&details_fixture());
        assert!(reduced.entries.is_empty());
    }

    #[test]
    fn test_reduce_is_idempotent() {
        let mut sel = Selector::new(TENANT, Service::Exchange);
        sel.filter(mail_subject("foo"));
        sel.exclude(mail_refs(vec!["nope".to_string()]));

        let once = sel.reduce(&details_fixture());
        let twice = sel.reduce(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_included_owners() {
        let mut sel = Selector::new(TENANT, Service::Exchange);
        sel.include(mails(
            vec!["u1".to_string(), "u2".to_string()],
            any(),
            any(),
        ));
        sel.include(contacts(vec!["u1".to_string()], any(), any()));

        assert_eq!(sel.included_owners(), vec!["u1", "u2"]);
        assert_eq!(
            sel.included_categories(),
            vec![Category::Email, Category::Contacts]
        );
    }
}
