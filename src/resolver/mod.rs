// Resolution of references against a repository backend
//
// Two backends implement the same Resolver trait: the local daemon image store
// and a remote registry. Both are reached through a small SPI so they can be
// exercised without a daemon or network.

pub mod daemon;
mod error;
pub mod registry;

pub use error::ResolveError;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::predicate::Predicate;
use crate::reference::Reference;

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Backend identifier used in log messages
    fn name(&self) -> &'static str;

    /// Produce a single digest-pinned reference for `reference`
    async fn resolve(&self, reference: &Reference) -> Result<Reference, ResolveError>;

    /// Every tag currently sharing the image of `reference`, each carrying that image's digest
    async fn find_all_tags(&self, reference: &Reference) -> Result<Vec<Reference>, ResolveError>;
}

/// Repository backend selected by configuration or `--backend`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Daemon,
    Registry,
}

impl BackendKind {
    pub fn from_backend_str(backend: &str) -> Result<Self> {
        match backend.to_ascii_lowercase().as_str() {
            "daemon" | "docker" => Ok(BackendKind::Daemon),
            "registry" => Ok(BackendKind::Registry),
            _ => bail!(
                "Invalid backend '{}'. Supported: daemon, registry",
                backend
            ),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Daemon => write!(f, "daemon"),
            BackendKind::Registry => write!(f, "registry"),
        }
    }
}

/// Build the resolver for `kind`, failing when that backend was compiled out
pub fn connect(kind: BackendKind, config: &Config) -> Result<Box<dyn Resolver>> {
    debug!("Connecting to {} backend", kind);
    match kind {
        #[cfg(feature = "daemon")]
        BackendKind::Daemon => {
            let _ = config;
            let store = daemon::BollardStore::connect()?;
            Ok(Box::new(daemon::DaemonResolver::new(store)))
        }
        #[cfg(not(feature = "daemon"))]
        BackendKind::Daemon => {
            let _ = config;
            bail!("This build of refpin does not include the daemon backend")
        }
        #[cfg(feature = "registry")]
        BackendKind::Registry => {
            let api = registry::OciRegistry::new(&config.registry);
            Ok(Box::new(registry::RegistryResolver::new(api)))
        }
        #[cfg(not(feature = "registry"))]
        BackendKind::Registry => {
            bail!("This build of refpin does not include the registry backend")
        }
    }
}

/// Precision of a tag: numeric components, then all components, then length.
///
/// Components are split on `.` and `-`, and a leading `v` before a digit is
/// ignored, so `1.2.3-alpine3.19` outranks `1.2.3-alpine`, which outranks `1.2`.
pub fn tag_precision(tag: &str) -> (usize, usize, usize) {
    let core = match tag.strip_prefix('v') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => tag,
    };
    let components: Vec<&str> = core.split(['.', '-']).filter(|c| !c.is_empty()).collect();
    let numeric = components
        .iter()
        .filter(|c| c.chars().all(|ch| ch.is_ascii_digit()))
        .count();
    (numeric, components.len(), tag.len())
}

fn compare_precision(a: &Reference, b: &Reference) -> Ordering {
    tag_precision(b.tag())
        .cmp(&tag_precision(a.tag()))
        .then_with(|| a.tag().cmp(b.tag()))
}

/// Pick the most specific tag among candidates sharing a digest.
///
/// Ties are broken by the lexicographically smallest tag. Untagged candidates
/// are only chosen when nothing else is available.
pub fn most_precise(candidates: &[Reference]) -> Option<Reference> {
    let mut ranked: Vec<&Reference> = candidates.iter().filter(|c| !c.tag().is_empty()).collect();
    if ranked.is_empty() {
        return candidates.first().cloned();
    }
    ranked.sort_by(|a, b| compare_precision(a, b));

    let chosen = ranked[0];
    if ranked.len() > 1 {
        info!(
            "Selected tag '{}' as the most precise of: {}",
            chosen.tag(),
            ranked
                .iter()
                .map(|r| r.tag())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Some(chosen.clone())
}

/// Canonical keys of the references whose tag now resolves to a different digest.
///
/// Only references carrying a digest are checked, once per distinct reference.
/// References the backend cannot resolve are logged and treated as current;
/// backend failures abort.
pub async fn find_outdated(
    resolver: &dyn Resolver,
    references: &[Reference],
) -> Result<HashSet<String>, ResolveError> {
    let mut checked = HashSet::new();
    let mut outdated = HashSet::new();

    for reference in references {
        if reference.digest().is_empty() || reference.path().is_empty() {
            continue;
        }
        let key = Predicate::outdated_key(reference);
        if !checked.insert(key.clone()) {
            continue;
        }

        let query = reference
            .with_digest("")
            .map_err(|e| ResolveError::Backend(e.into()))?;
        match resolver.resolve(&query).await {
            Ok(current) if current.digest() != reference.digest() => {
                info!(
                    "{} is outdated: tag now points to {}",
                    reference.original(),
                    current.digest()
                );
                outdated.insert(key);
            }
            Ok(_) => debug!("{} is current", reference.original()),
            Err(ResolveError::Backend(e)) => return Err(ResolveError::Backend(e)),
            Err(e) => warn!("Skipping outdated check for {}: {}", reference.original(), e),
        }
    }

    Ok(outdated)
}
