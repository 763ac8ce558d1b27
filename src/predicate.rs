// Reference predicates and filter-group validation

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::reference::{normalize_digest, parse_digest, FormatMask, Reference, DEFAULT_DOMAIN};

#[derive(Debug, Error)]
pub enum PredicateError {
    #[error("Conflicting {group} filters: {first} and {second} cannot be combined")]
    Conflict {
        group: PredicateGroup,
        first: &'static str,
        second: &'static str,
    },

    #[error("Invalid filter '{value}': {reason}")]
    InvalidFilter { value: String, reason: String },
}

/// Semantic group a predicate belongs to. At most one predicate per group may
/// be active; different groups combine conjunctively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateGroup {
    Domain,
    Name,
    Tag,
    Digest,
}

impl fmt::Display for PredicateGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PredicateGroup::Domain => "domain",
            PredicateGroup::Name => "name",
            PredicateGroup::Tag => "tag",
            PredicateGroup::Digest => "digest",
        };
        f.write_str(s)
    }
}

/// Repository name filter.
///
/// `nginx` and `docker.io/library/nginx` are the same filter. A filter written
/// without a registry host also matches the same path on any registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    canonical: String,
    path: String,
    written: String,
    explicit_domain: bool,
}

impl NameFilter {
    pub fn parse(value: &str) -> Result<Self, PredicateError> {
        let reference = Reference::parse(value).map_err(|e| PredicateError::InvalidFilter {
            value: value.to_string(),
            reason: e.to_string(),
        })?;
        if reference.path().is_empty()
            || !reference.tag().is_empty()
            || !reference.digest().is_empty()
        {
            return Err(PredicateError::InvalidFilter {
                value: value.to_string(),
                reason: "name filters take a repository name without tag or digest".to_string(),
            });
        }

        let written = if reference.has_explicit_domain() {
            reference.path().to_string()
        } else {
            value.to_string()
        };

        Ok(Self {
            canonical: reference.name(),
            path: reference.path().to_string(),
            written,
            explicit_domain: reference.has_explicit_domain(),
        })
    }

    fn matches(&self, reference: &Reference) -> bool {
        if reference.path().is_empty() {
            return false;
        }
        if reference.name() == self.canonical {
            return true;
        }
        !self.explicit_domain && (reference.path() == self.path || reference.path() == self.written)
    }
}

/// Boolean test over a [`Reference`]
#[derive(Debug, Clone)]
pub enum Predicate {
    Any,
    /// Tagged `latest`, or carrying neither tag nor digest
    Latest,
    /// No digest
    Unpinned,
    /// No tag
    Untagged,
    /// Listed in a precomputed set of stale references (keyed by canonical rendering)
    Outdated(Arc<HashSet<String>>),
    Domains(Vec<String>),
    Names(Vec<NameFilter>),
    Tags(Vec<String>),
    Digests(Vec<String>),
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Predicate::Domains(
            domains
                .into_iter()
                .map(|d| normalize_domain(d.as_ref()))
                .collect(),
        )
    }

    pub fn names<I, S>(names: I) -> Result<Self, PredicateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let filters = names
            .into_iter()
            .map(|n| NameFilter::parse(n.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Predicate::Names(filters))
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Predicate::Tags(tags.into_iter().map(|t| t.as_ref().to_string()).collect())
    }

    /// Digests may be given bare or algorithm-prefixed
    pub fn digests<I, S>(digests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Predicate::Digests(
            digests
                .into_iter()
                .map(|d| normalize_digest(d.as_ref()))
                .collect(),
        )
    }

    pub fn outdated(stale: HashSet<String>) -> Self {
        Predicate::Outdated(Arc::new(stale))
    }

    /// Key under which a reference is looked up by [`Predicate::Outdated`]
    pub fn outdated_key(reference: &Reference) -> String {
        reference.formatted(FormatMask::CANONICAL)
    }

    pub fn matches(&self, reference: &Reference) -> bool {
        match self {
            Predicate::Any => true,
            Predicate::Latest => {
                reference.digest().is_empty()
                    && (reference.tag().is_empty() || reference.tag() == "latest")
            }
            Predicate::Unpinned => reference.digest().is_empty(),
            Predicate::Untagged => reference.tag().is_empty(),
            Predicate::Outdated(stale) => stale.contains(&Self::outdated_key(reference)),
            Predicate::Domains(domains) => domains.iter().any(|d| d == reference.domain()),
            Predicate::Names(filters) => filters.iter().any(|f| f.matches(reference)),
            Predicate::Tags(tags) => tags.iter().any(|t| t == reference.tag()),
            Predicate::Digests(digests) => {
                !reference.digest().is_empty() && digests.iter().any(|d| d == reference.digest())
            }
            Predicate::And(children) => children.iter().all(|p| p.matches(reference)),
        }
    }

    /// Conjunction members; empty for every other predicate
    pub fn children(&self) -> &[Predicate] {
        match self {
            Predicate::And(children) => children,
            _ => &[],
        }
    }

    pub fn group(&self) -> Option<PredicateGroup> {
        match self {
            Predicate::Any | Predicate::And(_) => None,
            Predicate::Domains(_) => Some(PredicateGroup::Domain),
            Predicate::Names(_) => Some(PredicateGroup::Name),
            Predicate::Latest
            | Predicate::Untagged
            | Predicate::Outdated(_)
            | Predicate::Tags(_) => Some(PredicateGroup::Tag),
            Predicate::Unpinned | Predicate::Digests(_) => Some(PredicateGroup::Digest),
        }
    }

    /// Option name the predicate is selected with
    pub fn label(&self) -> &'static str {
        match self {
            Predicate::Any => "any",
            Predicate::Latest => "--latest",
            Predicate::Unpinned => "--unpinned",
            Predicate::Untagged => "--untagged",
            Predicate::Outdated(_) => "--outdated",
            Predicate::Domains(_) => "--domain",
            Predicate::Names(_) => "--name",
            Predicate::Tags(_) => "--tag",
            Predicate::Digests(_) => "--digest",
            Predicate::And(_) => "and",
        }
    }

    /// Reject trees with more than one predicate in the same group
    pub fn validate(&self) -> Result<(), PredicateError> {
        let mut seen: Vec<(PredicateGroup, &'static str)> = Vec::new();
        self.collect_groups(&mut seen)
    }

    fn collect_groups(
        &self,
        seen: &mut Vec<(PredicateGroup, &'static str)>,
    ) -> Result<(), PredicateError> {
        for child in self.children() {
            child.collect_groups(seen)?;
        }
        if let Some(group) = self.group() {
            if let Some((_, first)) = seen.iter().find(|(g, _)| *g == group) {
                return Err(PredicateError::Conflict {
                    group,
                    first,
                    second: self.label(),
                });
            }
            seen.push((group, self.label()));
        }
        Ok(())
    }
}

/// Filter selection as given by the user, validated into a [`Predicate`]
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub domains: Vec<String>,
    pub names: Vec<String>,
    pub untagged: bool,
    pub latest: bool,
    pub outdated: bool,
    pub tags: Vec<String>,
    pub unpinned: bool,
    pub digests: Vec<String>,
}

impl Filters {
    /// Validate the selection without any backend data
    pub fn check(&self) -> Result<(), PredicateError> {
        self.build(HashSet::new()).map(|_| ())
    }

    /// Build the conjunction of every selected filter.
    ///
    /// `stale` feeds the outdated predicate and is ignored when it is not selected.
    pub fn build(&self, stale: HashSet<String>) -> Result<Predicate, PredicateError> {
        let mut selected = Vec::new();

        if !self.domains.is_empty() {
            selected.push(Predicate::domains(&self.domains));
        }
        if !self.names.is_empty() {
            selected.push(Predicate::names(&self.names)?);
        }
        if self.untagged {
            selected.push(Predicate::Untagged);
        }
        if self.latest {
            selected.push(Predicate::Latest);
        }
        if self.outdated {
            selected.push(Predicate::outdated(stale));
        }
        if !self.tags.is_empty() {
            selected.push(Predicate::tags(&self.tags));
        }
        if self.unpinned {
            selected.push(Predicate::Unpinned);
        }
        if !self.digests.is_empty() {
            for digest in &self.digests {
                parse_digest(digest).map_err(|e| PredicateError::InvalidFilter {
                    value: digest.clone(),
                    reason: e.to_string(),
                })?;
            }
            selected.push(Predicate::digests(&self.digests));
        }

        let predicate = match selected.len() {
            0 => Predicate::Any,
            1 => selected.remove(0),
            _ => Predicate::And(selected),
        };
        predicate.validate()?;
        Ok(predicate)
    }
}

fn normalize_domain(domain: &str) -> String {
    match domain {
        "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => {
            DEFAULT_DOMAIN.to_string()
        }
        d => d.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "d21b9d7b5f8c3e6a7f0d3a1b2c4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60";

    fn r(s: &str) -> Reference {
        Reference::parse(s).unwrap()
    }

    #[test]
    fn test_latest() {
        assert!(Predicate::Latest.matches(&r("nginx")));
        assert!(Predicate::Latest.matches(&r("nginx:latest")));
        assert!(!Predicate::Latest.matches(&r("nginx:1.2")));
        assert!(!Predicate::Latest.matches(&r(&format!("nginx@sha256:{}", HEX))));
        assert!(!Predicate::Latest.matches(&r(&format!("nginx:latest@sha256:{}", HEX))));
        assert!(!Predicate::Latest.matches(&r(&format!("nginx:1.2@sha256:{}", HEX))));
    }

    #[test]
    fn test_unpinned_and_untagged() {
        assert!(Predicate::Unpinned.matches(&r("nginx:1.2")));
        assert!(!Predicate::Unpinned.matches(&r(&format!("nginx:1.2@sha256:{}", HEX))));
        assert!(Predicate::Untagged.matches(&r("nginx")));
        assert!(Predicate::Untagged.matches(&r(&format!("nginx@sha256:{}", HEX))));
        assert!(!Predicate::Untagged.matches(&r("nginx:1")));
    }

    #[test]
    fn test_domains() {
        let p = Predicate::domains(["index.docker.io", "ghcr.io"]);
        assert!(p.matches(&r("nginx")));
        assert!(p.matches(&r("ghcr.io/org/app")));
        assert!(!p.matches(&r("quay.io/org/app")));
    }

    #[test]
    fn test_names_normalize_familiar_forms() {
        let p = Predicate::names(["nginx"]).unwrap();
        assert!(p.matches(&r("nginx:1.25")));
        assert!(p.matches(&r("docker.io/library/nginx")));
        assert!(p.matches(&r("registry.local:5000/nginx")));
        assert!(!p.matches(&r("bitnami/nginx")));

        let p = Predicate::names(["docker.io/library/nginx"]).unwrap();
        assert!(p.matches(&r("nginx")));
        assert!(!p.matches(&r("registry.local:5000/nginx")));
    }

    #[test]
    fn test_names_match_path_on_other_registry() {
        let p = Predicate::names(["team/app"]).unwrap();
        assert!(p.matches(&r("registry.example.com/team/app:1")));
        assert!(p.matches(&r("team/app")));
        assert!(!p.matches(&r("registry.example.com/other/app")));
    }

    #[test]
    fn test_names_reject_tagged_filter() {
        assert!(Predicate::names(["nginx:1.2"]).is_err());
    }

    #[test]
    fn test_tags_and_digests() {
        let p = Predicate::tags(["1.2", "latest"]);
        assert!(p.matches(&r("nginx:1.2")));
        assert!(!p.matches(&r("nginx")));

        let prefixed = format!("sha256:{}", HEX);
        for filter in [HEX.to_string(), prefixed.clone()] {
            let p = Predicate::digests([filter]);
            assert!(p.matches(&r(&format!("nginx@{}", prefixed))));
            assert!(p.matches(&r(HEX)));
            assert!(!p.matches(&r("nginx")));
        }
    }

    #[test]
    fn test_outdated_membership() {
        let stale = r(&format!("nginx:1.2@sha256:{}", HEX));
        let p = Predicate::outdated(HashSet::from([Predicate::outdated_key(&stale)]));
        assert!(p.matches(&r(&format!("docker.io/library/nginx:1.2@sha256:{}", HEX))));
        assert!(!p.matches(&r("nginx:1.2")));
    }

    #[test]
    fn test_and_exposes_children() {
        let p = Predicate::And(vec![Predicate::Latest, Predicate::domains(["docker.io"])]);
        assert_eq!(p.children().len(), 2);
        assert!(p.matches(&r("nginx")));
        assert!(!p.matches(&r("ghcr.io/org/app")));
        assert!(Predicate::Any.children().is_empty());
    }

    #[test]
    fn test_validate_rejects_same_group() {
        let p = Predicate::And(vec![Predicate::Latest, Predicate::Untagged]);
        match p.validate() {
            Err(PredicateError::Conflict {
                group,
                first,
                second,
            }) => {
                assert_eq!(group, PredicateGroup::Tag);
                assert_eq!(first, "--latest");
                assert_eq!(second, "--untagged");
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_filters_build() {
        assert!(matches!(Filters::default().build(HashSet::new()), Ok(Predicate::Any)));

        let filters = Filters {
            names: vec!["nginx".to_string()],
            latest: true,
            unpinned: true,
            ..Default::default()
        };
        let p = filters.build(HashSet::new()).unwrap();
        assert_eq!(p.children().len(), 3);
        assert!(p.matches(&r("nginx")));
        assert!(!p.matches(&r("nginx:1.2")));
    }

    #[test]
    fn test_filters_conflicts() {
        let tag_conflict = Filters {
            latest: true,
            tags: vec!["1.2".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            tag_conflict.check(),
            Err(PredicateError::Conflict {
                group: PredicateGroup::Tag,
                ..
            })
        ));

        let digest_conflict = Filters {
            unpinned: true,
            digests: vec![HEX.to_string()],
            ..Default::default()
        };
        assert!(matches!(
            digest_conflict.check(),
            Err(PredicateError::Conflict {
                group: PredicateGroup::Digest,
                ..
            })
        ));

        let bad_digest = Filters {
            digests: vec!["sha256:nope".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            bad_digest.check(),
            Err(PredicateError::InvalidFilter { .. })
        ));
    }
}
