use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::{info, warn};

use super::args::{BackendArgs, FilterArgs, InputArgs};
use super::exit::{UsageError, SUCCESS};
use super::input::read_document;
use super::{backend_kind, build_predicate, select_format};
use crate::config::Config;
use crate::format::FormatRegistry;
use crate::pin::{pin, PinFormat, PinOptions};
use crate::resolver;

/// Flags of the `pin` command that are not shared with other commands
#[derive(Debug, Clone)]
pub struct PinFlags {
    pub pin_format: String,
    pub precise_tag: bool,
    pub fail_fast: bool,
    pub in_place: bool,
}

/// Pin matching references and print the document, or rewrite the file with `--in-place`
pub async fn pin_references(
    registry: &FormatRegistry,
    config: &Config,
    filter_args: &FilterArgs,
    backend: &BackendArgs,
    input: &InputArgs,
    flags: &PinFlags,
) -> Result<u8> {
    let filters = filter_args.to_filters();
    filters.check()?;
    let kind = backend_kind(config, backend)?;
    let options = PinOptions {
        format: PinFormat::from_format_str(&flags.pin_format).map_err(UsageError::from_anyhow)?,
        precise_tag: flags.precise_tag,
        fail_fast: flags.fail_fast,
    };
    if flags.in_place && input.file == "-" {
        return Err(UsageError("--in-place needs a file, not stdin".to_string()).into());
    }

    let document = read_document(&input.file)?;
    let format = select_format(registry, &document, input.format.as_deref())?;
    let resolver = resolver::connect(kind, config)?;
    let predicate =
        build_predicate(&filters, format, &document, Some(resolver.as_ref())).await?;

    let mut output = Vec::with_capacity(document.content.len());
    let report = pin(
        format,
        &document.content,
        &predicate,
        resolver.as_ref(),
        &options,
        &mut output,
    )
    .await?;

    match &document.path {
        Some(path) if flags.in_place => replace_file(path, &output)?,
        _ => {
            let mut stdout = io::stdout();
            stdout
                .write_all(&output)
                .and_then(|_| stdout.flush())
                .context("Failed to write output")?;
        }
    }

    info!(
        "Pinned {} of {} matching references",
        report.pinned, report.matched
    );
    if !report.failures.is_empty() {
        warn!(
            "{} references could not be resolved and were left unchanged: {}",
            report.failures.len(),
            report
                .failures
                .iter()
                .map(|(original, _)| original.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(SUCCESS)
}

/// Atomically replace `path` with `contents`, keeping its permissions
fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let permissions = fs::metadata(path)
        .with_context(|| format!("Failed to read metadata of {}", path.display()))?
        .permissions();

    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    temp.write_all(contents)
        .context("Failed to write temporary file")?;
    fs::set_permissions(temp.path(), permissions)
        .context("Failed to set permissions on temporary file")?;
    temp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
