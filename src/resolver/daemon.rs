// Local daemon backend
//
// Resolution reads the repo digests the daemon recorded for an image when it
// was pulled or pushed. A locally built image has none and cannot be pinned.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ResolveError, Resolver};
use crate::reference::{FormatMask, Reference};

/// What the daemon knows about one local image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalImage {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
}

/// Image inspection on a local image store
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// `None` when no local image answers to `reference`
    async fn inspect(&self, reference: &str) -> anyhow::Result<Option<LocalImage>>;
}

pub struct DaemonResolver<S> {
    store: S,
}

impl<S: ImageStore> DaemonResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    async fn inspect(&self, reference: &Reference) -> Result<LocalImage, ResolveError> {
        let query = reference.formatted(FormatMask::CANONICAL);
        debug!("Inspecting local image {}", query);
        self.store
            .inspect(&query)
            .await?
            .ok_or_else(|| ResolveError::not_resolvable(reference.original(), "no such local image"))
    }
}

/// Pick the one digest recorded for `reference`.
///
/// Candidates are narrowed to the reference's registry, then to its repository;
/// a narrowing step that would leave nothing is skipped. More than one distinct
/// digest left is an ambiguity error.
fn pick_digest(reference: &Reference, image: &LocalImage) -> Result<String, ResolveError> {
    let mut candidates: Vec<Reference> = image
        .repo_digests
        .iter()
        .filter_map(|d| match Reference::parse(d) {
            Ok(r) if !r.digest().is_empty() => Some(r),
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring unparsable repo digest '{}': {}", d, e);
                None
            }
        })
        .collect();

    if candidates.is_empty() {
        return Err(ResolveError::not_resolvable(
            reference.original(),
            format!(
                "local image {} has no repo digests (it was never pulled from or pushed to a registry)",
                image.id
            ),
        ));
    }

    candidates = narrow(candidates, |c| c.domain() == reference.domain());
    candidates = narrow(candidates, |c| c.name() == reference.name());

    let mut digests: Vec<&str> = candidates.iter().map(|c| c.digest()).collect();
    digests.sort_unstable();
    digests.dedup();

    match digests.as_slice() {
        [digest] => Ok(digest.to_string()),
        _ => Err(ResolveError::Ambiguous {
            reference: reference.original().to_string(),
            candidates: candidates
                .iter()
                .map(|c| c.formatted(FormatMask::CANONICAL))
                .collect(),
        }),
    }
}

fn narrow(candidates: Vec<Reference>, keep: impl Fn(&Reference) -> bool) -> Vec<Reference> {
    if candidates.len() < 2 {
        return candidates;
    }
    let narrowed: Vec<Reference> = candidates.iter().filter(|c| keep(c)).cloned().collect();
    if narrowed.is_empty() {
        candidates
    } else {
        narrowed
    }
}

#[async_trait]
impl<S: ImageStore> Resolver for DaemonResolver<S> {
    fn name(&self) -> &'static str {
        "daemon"
    }

    async fn resolve(&self, reference: &Reference) -> Result<Reference, ResolveError> {
        let image = self.inspect(reference).await?;
        let digest = pick_digest(reference, &image)?;
        info!("Resolved {} to {}", reference.original(), digest);
        reference
            .with_digest(&digest)
            .map_err(|e| ResolveError::Backend(e.into()))
    }

    async fn find_all_tags(&self, reference: &Reference) -> Result<Vec<Reference>, ResolveError> {
        let image = self.inspect(reference).await?;
        let digest = pick_digest(reference, &image)?;

        let tags: Vec<Reference> = image
            .repo_tags
            .iter()
            .filter_map(|t| Reference::parse(t).ok())
            .filter(|t| t.name() == reference.name() && !t.tag().is_empty())
            .map(|t| t.with_digest(&digest))
            .collect::<Result<_, _>>()
            .map_err(|e| ResolveError::Backend(e.into()))?;

        if tags.is_empty() {
            return Err(ResolveError::not_resolvable(
                reference.original(),
                "local image has no tags for this repository",
            ));
        }
        Ok(tags)
    }
}

/// [`ImageStore`] backed by the Docker Engine API
#[cfg(feature = "daemon")]
pub struct BollardStore {
    docker: bollard::Docker,
}

#[cfg(feature = "daemon")]
impl BollardStore {
    pub fn connect() -> anyhow::Result<Self> {
        use anyhow::Context;

        let docker = bollard::Docker::connect_with_local_defaults()
            .context("Failed to connect to the local Docker daemon")?;
        Ok(Self { docker })
    }
}

#[cfg(feature = "daemon")]
#[async_trait]
impl ImageStore for BollardStore {
    async fn inspect(&self, reference: &str) -> anyhow::Result<Option<LocalImage>> {
        match self.docker.inspect_image(reference).await {
            Ok(image) => Ok(Some(LocalImage {
                id: image.id.unwrap_or_default(),
                repo_tags: image.repo_tags.unwrap_or_default(),
                repo_digests: image.repo_digests.unwrap_or_default(),
            })),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to inspect image {}", reference))),
        }
    }
}
