pub mod args;
pub mod exit;
pub mod find;
pub mod input;
pub mod list;
pub mod pin;

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::config::Config;
use crate::format::accumulate::accumulate;
use crate::format::{Format, FormatRegistry};
use crate::predicate::{Filters, Predicate};
use crate::reference::Reference;
use crate::resolver::{self, find_outdated, BackendKind, Resolver};
use args::BackendArgs;
use exit::UsageError;
use input::Document;

/// JSON shape of one reference in `find --json` and `list --json`
#[derive(Debug, Serialize)]
pub struct ReferenceJson {
    pub original: String,
    pub domain: String,
    pub name: String,
    pub tag: String,
    pub digest: String,
}

impl From<&Reference> for ReferenceJson {
    fn from(reference: &Reference) -> Self {
        Self {
            original: reference.original().to_string(),
            domain: reference.domain().to_string(),
            name: reference.name(),
            tag: reference.tag().to_string(),
            digest: reference.digest().to_string(),
        }
    }
}

/// Backend from `--backend`, the config file, or the default
pub(crate) fn backend_kind(config: &Config, args: &BackendArgs) -> Result<BackendKind> {
    config
        .get_backend(args.backend.as_deref())
        .map_err(|e| UsageError::from_anyhow(e).into())
}

/// Handler for the document: the one named by `--format`, or the single one that accepts it
pub(crate) fn select_format<'a>(
    registry: &'a FormatRegistry,
    document: &Document,
    forced: Option<&str>,
) -> Result<&'a dyn Format> {
    let name = document.name().unwrap_or("<stdin>");

    if let Some(forced) = forced {
        let format = registry.get(forced)?;
        format
            .validate_input(&document.content, document.name())
            .with_context(|| format!("{} is not a valid {} document", name, format.name()))?;
        return Ok(format);
    }

    let identified = registry
        .identify(&document.content, document.name())
        .with_context(|| format!("Cannot determine the format of {}", name))?;
    for rejection in &identified.rejections {
        debug!("Not {}: {}", rejection.format, rejection.error);
    }
    debug!("Detected {} as {}", name, identified.format.name());
    Ok(identified.format)
}

/// Build the predicate for validated filters, querying the backend only for `--outdated`
pub(crate) async fn build_predicate(
    filters: &Filters,
    format: &dyn Format,
    document: &Document,
    resolver: Option<&dyn Resolver>,
) -> Result<Predicate> {
    let stale = match (filters.outdated, resolver) {
        (true, Some(resolver)) => {
            let all = accumulate(format, &document.content, &Predicate::Any)?;
            find_outdated(resolver, &all)
                .await
                .context("Failed to check for outdated references")?
        }
        _ => HashSet::new(),
    };
    Ok(filters.build(stale)?)
}

/// Connect to the backend when the filters need one
pub(crate) fn resolver_for_filters(
    filters: &Filters,
    kind: BackendKind,
    config: &Config,
) -> Result<Option<Box<dyn Resolver>>> {
    if filters.outdated {
        Ok(Some(resolver::connect(kind, config)?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatError;
    use crate::resolver::tests::{MockResolver, HEX_A, HEX_B};

    fn document(content: &str) -> Document {
        Document {
            path: None,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_select_format_detects() {
        let registry = FormatRegistry::builtin();
        let format = select_format(&registry, &document("FROM nginx\n"), None).unwrap();
        assert_eq!(format.name(), "dockerfile");
    }

    #[test]
    fn test_select_format_forced() {
        let registry = FormatRegistry::builtin();
        let compose = document("services:\n  web:\n    image: nginx\n");
        let format = select_format(&registry, &compose, Some("compose")).unwrap();
        assert_eq!(format.name(), "compose");

        let err = select_format(&registry, &compose, Some("dockerfile")).err().unwrap();
        assert_eq!(exit::exit_code(&err), exit::INVALID_FORMAT);

        let err = select_format(&registry, &compose, Some("helm")).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<FormatError>(),
            Some(FormatError::NotRegistered { .. })
        ));
    }

    #[test]
    fn test_select_format_unknown() {
        let registry = FormatRegistry::builtin();
        let err = select_format(&registry, &document("hello\n"), None).err().unwrap();
        assert_eq!(exit::exit_code(&err), exit::INVALID_FORMAT);
    }

    #[test]
    fn test_backend_kind_usage_error() {
        let config = Config::default();
        let args = BackendArgs {
            backend: Some("carrier-pigeon".to_string()),
        };
        let err = backend_kind(&config, &args).unwrap_err();
        assert_eq!(exit::exit_code(&err), exit::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_build_predicate_outdated() {
        let resolver = MockResolver::default()
            .with("docker.io/library/nginx:1.25", HEX_B)
            .with("docker.io/library/redis:7", HEX_A);
        let doc = document(&format!(
            "FROM nginx:1.25@sha256:{a}\nFROM redis:7@sha256:{a}\n",
            a = HEX_A
        ));
        let filters = Filters {
            outdated: true,
            ..Default::default()
        };

        let predicate = build_predicate(
            &filters,
            &crate::format::dockerfile::Dockerfile,
            &doc,
            Some(&resolver as &dyn Resolver),
        )
        .await
        .unwrap();
        let matches =
            accumulate(&crate::format::dockerfile::Dockerfile, &doc.content, &predicate).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].familiar_name(), "nginx");
    }
}
