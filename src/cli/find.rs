use anyhow::{Context, Result};
use tracing::info;

use super::args::{BackendArgs, FilterArgs, InputArgs};
use super::exit::{NO_MATCH, SUCCESS};
use super::input::read_document;
use super::{backend_kind, build_predicate, resolver_for_filters, select_format, ReferenceJson};
use crate::config::Config;
use crate::format::accumulate::accumulate;
use crate::format::FormatRegistry;
use crate::reference::{FormatMask, Reference};

/// Print the references matching the filters, one per line
pub async fn find_references(
    registry: &FormatRegistry,
    config: &Config,
    filters: &FilterArgs,
    backend: &BackendArgs,
    input: &InputArgs,
    canonical: bool,
    json: bool,
) -> Result<u8> {
    let matches = matching_references(registry, config, filters, backend, input).await?;
    print!("{}", render_references(&matches, canonical, json)?);

    Ok(if matches.is_empty() { NO_MATCH } else { SUCCESS })
}

/// Exit successfully when at least one reference matches; prints nothing
pub async fn contains_reference(
    registry: &FormatRegistry,
    config: &Config,
    filters: &FilterArgs,
    backend: &BackendArgs,
    input: &InputArgs,
) -> Result<u8> {
    let matches = matching_references(registry, config, filters, backend, input).await?;
    info!("{} matching references", matches.len());

    Ok(if matches.is_empty() { NO_MATCH } else { SUCCESS })
}

async fn matching_references(
    registry: &FormatRegistry,
    config: &Config,
    filter_args: &FilterArgs,
    backend: &BackendArgs,
    input: &InputArgs,
) -> Result<Vec<Reference>> {
    // Parameters are checked before the document is read
    let filters = filter_args.to_filters();
    filters.check()?;
    let kind = backend_kind(config, backend)?;

    let document = read_document(&input.file)?;
    let format = select_format(registry, &document, input.format.as_deref())?;
    let resolver = resolver_for_filters(&filters, kind, config)?;
    let predicate = build_predicate(&filters, format, &document, resolver.as_deref()).await?;

    Ok(accumulate(format, &document.content, &predicate)?)
}

fn render_references(references: &[Reference], canonical: bool, json: bool) -> Result<String> {
    if json {
        let entries: Vec<ReferenceJson> = references.iter().map(ReferenceJson::from).collect();
        let mut out =
            serde_json::to_string_pretty(&entries).context("Failed to serialize references")?;
        out.push('\n');
        return Ok(out);
    }

    let mut out = String::new();
    for reference in references {
        if canonical {
            out.push_str(&reference.formatted(FormatMask::CANONICAL));
        } else {
            out.push_str(reference.original());
        }
        out.push('\n');
    }
    Ok(out)
}
