// Remote registry backend
//
// The registry is authoritative for tag -> digest, so resolution is a single
// manifest digest lookup. Tag enumeration lists the repository and keeps the
// tags whose manifest digest matches.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{ResolveError, Resolver};
use crate::reference::Reference;

const DEFAULT_TAG: &str = "latest";

/// Tag listing and tag lookups on a registry
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Every tag of the repository, across all pages
    async fn list_tags(&self, repository: &Reference) -> anyhow::Result<Vec<String>>;

    /// Manifest digest of `tag`; `None` when the registry does not know the tag
    async fn tag_digest(&self, repository: &Reference, tag: &str)
        -> anyhow::Result<Option<String>>;
}

pub struct RegistryResolver<A> {
    api: A,
}

impl<A: RegistryApi> RegistryResolver<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }
}

#[async_trait]
impl<A: RegistryApi> Resolver for RegistryResolver<A> {
    fn name(&self) -> &'static str {
        "registry"
    }

    async fn resolve(&self, reference: &Reference) -> Result<Reference, ResolveError> {
        if reference.path().is_empty() {
            return Err(ResolveError::not_resolvable(
                reference.original(),
                "a bare digest names no repository",
            ));
        }
        if !reference.digest().is_empty() && reference.tag().is_empty() {
            debug!("{} is already pinned", reference.original());
            return Ok(reference.clone());
        }

        let tag = if reference.tag().is_empty() {
            DEFAULT_TAG
        } else {
            reference.tag()
        };
        let digest = self.api.tag_digest(reference, tag).await?.ok_or_else(|| {
            ResolveError::not_resolvable(
                reference.original(),
                format!("tag '{}' not found in {}", tag, reference.name()),
            )
        })?;

        info!("Resolved {} to {}", reference.original(), digest);
        reference
            .with_tag(tag)
            .and_then(|r| r.with_digest(&digest))
            .map_err(|e| ResolveError::Backend(e.into()))
    }

    async fn find_all_tags(&self, reference: &Reference) -> Result<Vec<Reference>, ResolveError> {
        let pinned = self.resolve(reference).await?;
        let tags = self.api.list_tags(reference).await?;
        debug!(
            "Comparing {} tags of {} against {}",
            tags.len(),
            reference.name(),
            pinned.digest()
        );

        let mut found = Vec::new();
        for tag in tags {
            if let Some(digest) = self.api.tag_digest(reference, &tag).await? {
                if digest == pinned.digest() {
                    found.push(
                        pinned
                            .with_tag(&tag)
                            .map_err(|e| ResolveError::Backend(e.into()))?,
                    );
                }
            }
        }
        Ok(found)
    }
}

#[cfg(feature = "registry")]
pub use oci::OciRegistry;

#[cfg(feature = "registry")]
mod oci {
    use anyhow::Context;
    use async_trait::async_trait;
    use oci_distribution::client::{ClientConfig, ClientProtocol};
    use oci_distribution::errors::OciDistributionError;
    use oci_distribution::secrets::RegistryAuth;
    use oci_distribution::Client;
    use tracing::debug;

    use super::RegistryApi;
    use crate::config::RegistrySettings;
    use crate::reference::Reference;

    const PAGE_SIZE: usize = 1000;

    /// [`RegistryApi`] speaking the OCI distribution protocol
    pub struct OciRegistry {
        client: Client,
        auth: RegistryAuth,
    }

    impl OciRegistry {
        pub fn new(settings: &RegistrySettings) -> Self {
            let protocol = if settings.insecure.is_empty() {
                ClientProtocol::Https
            } else {
                ClientProtocol::HttpsExcept(settings.insecure.clone())
            };
            let client = Client::new(ClientConfig {
                protocol,
                ..Default::default()
            });

            let auth = match (&settings.username, &settings.password) {
                (Some(username), Some(password)) => {
                    RegistryAuth::Basic(username.clone(), password.clone())
                }
                _ => RegistryAuth::Anonymous,
            };

            Self { client, auth }
        }

        fn oci_reference(reference: &Reference, tag: &str) -> oci_distribution::Reference {
            oci_distribution::Reference::with_tag(
                reference.domain().to_string(),
                reference.path().to_string(),
                tag.to_string(),
            )
        }
    }

    /// Registries report unknown tags in several ways; anything else is a real failure
    fn is_not_found(err: &OciDistributionError) -> bool {
        let message = err.to_string();
        message.contains("404")
            || message.contains("not found")
            || message.contains("MANIFEST_UNKNOWN")
    }

    #[async_trait]
    impl RegistryApi for OciRegistry {
        async fn list_tags(&self, repository: &Reference) -> anyhow::Result<Vec<String>> {
            let image = Self::oci_reference(repository, "latest");
            let mut tags: Vec<String> = Vec::new();
            let mut last: Option<String> = None;

            loop {
                let page = self
                    .client
                    .list_tags(&image, &self.auth, Some(PAGE_SIZE), last.as_deref())
                    .await
                    .with_context(|| format!("Failed to list tags of {}", repository.name()))?;
                debug!("Fetched {} tags of {}", page.tags.len(), repository.name());

                let next = page.tags.last().cloned();
                let full_page = page.tags.len() >= PAGE_SIZE;
                tags.extend(page.tags);

                // Registries that ignore pagination return the same page again
                if !full_page || next.is_none() || next == last {
                    break;
                }
                last = next;
            }

            Ok(tags)
        }

        async fn tag_digest(
            &self,
            repository: &Reference,
            tag: &str,
        ) -> anyhow::Result<Option<String>> {
            let image = Self::oci_reference(repository, tag);
            match self.client.fetch_manifest_digest(&image, &self.auth).await {
                Ok(digest) => Ok(Some(digest)),
                Err(e) if is_not_found(&e) => Ok(None),
                Err(e) => Err(anyhow::Error::new(e)
                    .context(format!("Failed to fetch digest of {}:{}", repository.name(), tag))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::{HEX_A, HEX_B};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockRegistry {
        /// `repository name -> [(tag, digest)]`
        repositories: HashMap<String, Vec<(String, String)>>,
        lookups: AtomicUsize,
    }

    impl MockRegistry {
        fn with(mut self, name: &str, tag: &str, hex: &str) -> Self {
            self.repositories
                .entry(name.to_string())
                .or_default()
                .push((tag.to_string(), format!("sha256:{}", hex)));
            self
        }
    }

    #[async_trait]
    impl RegistryApi for MockRegistry {
        async fn list_tags(&self, repository: &Reference) -> anyhow::Result<Vec<String>> {
            Ok(self
                .repositories
                .get(&repository.name())
                .map(|tags| tags.iter().map(|(t, _)| t.clone()).collect())
                .unwrap_or_default())
        }

        async fn tag_digest(
            &self,
            repository: &Reference,
            tag: &str,
        ) -> anyhow::Result<Option<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if repository.domain() == "down.example.com" {
                anyhow::bail!("error sending request: connection refused");
            }
            Ok(self.repositories.get(&repository.name()).and_then(|tags| {
                tags.iter()
                    .find(|(t, _)| t == tag)
                    .map(|(_, d)| d.clone())
            }))
        }
    }

    fn registry() -> MockRegistry {
        MockRegistry::default()
            .with("docker.io/library/nginx", "latest", HEX_A)
            .with("docker.io/library/nginx", "1", HEX_A)
            .with("docker.io/library/nginx", "1.25", HEX_A)
            .with("docker.io/library/nginx", "1.24", HEX_B)
    }

    #[tokio::test]
    async fn test_resolve_defaults_to_latest() {
        let resolver = RegistryResolver::new(registry());
        let resolved = resolver
            .resolve(&Reference::parse("nginx").unwrap())
            .await
            .unwrap();
        assert_eq!(resolved.tag(), "latest");
        assert_eq!(resolved.digest_hex(), HEX_A);
    }

    #[tokio::test]
    async fn test_resolve_tag() {
        let resolver = RegistryResolver::new(registry());
        let resolved = resolver
            .resolve(&Reference::parse("nginx:1.24").unwrap())
            .await
            .unwrap();
        assert_eq!(resolved.digest_hex(), HEX_B);
    }

    #[tokio::test]
    async fn test_resolve_pinned_without_tag_is_unchanged() {
        let api = registry();
        let resolver = RegistryResolver::new(api);
        let pinned = Reference::parse(&format!("nginx@sha256:{}", HEX_B)).unwrap();
        let resolved = resolver.resolve(&pinned).await.unwrap();
        assert_eq!(resolved, pinned);
        assert_eq!(resolver.api.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolve_unknown_tag() {
        let resolver = RegistryResolver::new(registry());
        let err = resolver
            .resolve(&Reference::parse("nginx:0.1").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotResolvable { .. }));
        assert!(err.to_string().contains("tag '0.1' not found"));
    }

    #[tokio::test]
    async fn test_backend_errors_propagate_unchanged() {
        let resolver = RegistryResolver::new(registry());
        let err = resolver
            .resolve(&Reference::parse("down.example.com/app:1").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Backend(_)));
        assert_eq!(
            err.to_string(),
            "error sending request: connection refused"
        );
    }

    #[tokio::test]
    async fn test_find_all_tags_shares_digest() {
        let resolver = RegistryResolver::new(registry());
        let tags = resolver
            .find_all_tags(&Reference::parse("nginx:1").unwrap())
            .await
            .unwrap();
        let names: Vec<&str> = tags.iter().map(|t| t.tag()).collect();
        assert_eq!(names, vec!["latest", "1", "1.25"]);
        assert!(tags.iter().all(|t| t.digest_hex() == HEX_A));
    }
}
