// Digest pinning
//
// Matches are collected first, each distinct reference is resolved once
// against the backend, and the document is then rewritten in a single pass
// from the precomputed replacements.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::io::Write;
use tracing::{debug, info, warn};

use crate::format::accumulate::{accumulate, accumulate_and_rewrite};
use crate::format::Format;
use crate::predicate::Predicate;
use crate::reference::{FormatMask, Reference};
use crate::resolver::{most_precise, ResolveError, Resolver};

/// Text form of a pinned reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinFormat {
    /// Bare hex digest
    Digest,
    /// `name@sha256:...`
    #[default]
    NameDigest,
    /// `name:tag@sha256:...`
    NameTagDigest,
}

impl PinFormat {
    pub fn from_format_str(value: &str) -> Result<Self> {
        match value {
            "digest" => Ok(PinFormat::Digest),
            "name-digest" => Ok(PinFormat::NameDigest),
            "name-tag-digest" => Ok(PinFormat::NameTagDigest),
            _ => bail!(
                "Invalid pin format '{}'. Supported: digest, name-digest, name-tag-digest",
                value
            ),
        }
    }

    pub fn mask(self) -> FormatMask {
        match self {
            PinFormat::Digest => FormatMask::DIGEST_ONLY,
            PinFormat::NameDigest => FormatMask::NAME_DIGEST,
            PinFormat::NameTagDigest => FormatMask::FAMILIAR,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PinOptions {
    pub format: PinFormat,
    /// Replace the tag with the most precise tag sharing the resolved digest
    pub precise_tag: bool,
    /// Abort on the first reference that cannot be resolved
    pub fail_fast: bool,
}

/// What a pin run did
#[derive(Debug, Default)]
pub struct PinReport {
    pub matched: usize,
    pub pinned: usize,
    /// References left unchanged because they could not be resolved
    pub failures: Vec<(String, ResolveError)>,
}

/// Resolve one reference and render it for the document
pub async fn pin_reference(
    resolver: &dyn Resolver,
    reference: &Reference,
    options: &PinOptions,
) -> Result<Reference, ResolveError> {
    let mut resolved = resolver.resolve(reference).await?;

    if options.precise_tag {
        let tags = resolver.find_all_tags(reference).await?;
        if let Some(best) = most_precise(&tags) {
            resolved = resolved
                .with_tag(best.tag())
                .map_err(|e| ResolveError::Backend(e.into()))?;
        }
    }

    let mut mask = options.format.mask();
    if reference.has_explicit_domain() && mask.contains(FormatMask::NAME) {
        mask |= FormatMask::DOMAIN;
    }
    Ok(resolved.reformatted(mask))
}

/// Pin every reference matching `predicate` and write the rewritten document to `output`.
///
/// Nothing is written when the run fails. Without `fail_fast`, unresolvable
/// references are reported in the returned [`PinReport`] and left unchanged.
pub async fn pin(
    format: &dyn Format,
    input: &str,
    predicate: &Predicate,
    resolver: &dyn Resolver,
    options: &PinOptions,
    output: &mut dyn Write,
) -> Result<PinReport> {
    let matches = accumulate(format, input, predicate)?;
    debug!(
        "{} references match, resolving with the {} backend",
        matches.len(),
        resolver.name()
    );

    let mut report = PinReport {
        matched: matches.len(),
        ..Default::default()
    };
    let mut replacements: HashMap<String, Reference> = HashMap::new();

    for reference in &matches {
        if replacements.contains_key(reference.original())
            || report
                .failures
                .iter()
                .any(|(original, _)| original == reference.original())
        {
            continue;
        }

        match pin_reference(resolver, reference, options).await {
            Ok(pinned) => {
                info!("Pinning {} as {}", reference.original(), pinned.original());
                replacements.insert(reference.original().to_string(), pinned);
            }
            Err(e) if options.fail_fast => {
                return Err(e).with_context(|| format!("Failed to pin {}", reference.original()));
            }
            Err(e) => {
                warn!("Leaving {} unchanged: {}", reference.original(), e);
                report.failures.push((reference.original().to_string(), e));
            }
        }
    }

    accumulate_and_rewrite(format, input, predicate, output, |reference| {
        Ok(match replacements.get(reference.original()) {
            Some(pinned) => pinned.clone(),
            None => reference.clone(),
        })
    })?;

    report.pinned = matches
        .iter()
        .filter(|r| replacements.contains_key(r.original()))
        .count();
    Ok(report)
}
