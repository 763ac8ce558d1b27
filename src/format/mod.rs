// Document formats
//
// A Format recognizes one document dialect, extracts the image references in
// it and re-emits the document with each reference passed through a rewrite
// callback. Bytes outside reference spans are copied unchanged.

pub mod accumulate;
pub mod compose;
pub mod dockerfile;
mod error;

pub use error::{FormatError, Rejection};

use std::io::Write;
use std::ops::Range;
use tracing::debug;

use crate::reference::Reference;

/// Callback receiving every reference in document order; the returned
/// reference's `original()` text is written in place of the source span.
pub type RewriteFn<'a> = dyn FnMut(&Reference) -> anyhow::Result<Reference> + 'a;

pub trait Format: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check whether this handler understands `input`.
    ///
    /// Must not accept anything `process` would then fail to parse.
    fn validate_input(&self, input: &str, filename: Option<&str>) -> Result<(), FormatError>;

    fn process(
        &self,
        input: &str,
        output: &mut dyn Write,
        rewrite: &mut RewriteFn<'_>,
    ) -> Result<(), FormatError>;
}

/// Handler selected by [`identify_format`], with the diagnostics of the handlers that declined
pub struct Identified<'a> {
    pub format: &'a dyn Format,
    pub rejections: Vec<Rejection>,
}

/// Run every handler's validation and pick the single one that accepts.
///
/// No acceptor is `FormatError::Unknown`; several acceptors is
/// `FormatError::Ambiguous` listing all of them.
pub fn identify_format<'a>(
    formats: &'a [Box<dyn Format>],
    input: &str,
    filename: Option<&str>,
) -> Result<Identified<'a>, FormatError> {
    let mut accepted: Vec<&'a dyn Format> = Vec::new();
    let mut rejections = Vec::new();

    for format in formats {
        match format.validate_input(input, filename) {
            Ok(()) => {
                debug!("Format '{}' accepts the input", format.name());
                accepted.push(format.as_ref());
            }
            Err(error) => {
                debug!("Format '{}' rejects the input: {}", format.name(), error);
                rejections.push(Rejection {
                    format: format.name(),
                    error,
                });
            }
        }
    }

    match accepted.len() {
        0 => Err(FormatError::Unknown(rejections)),
        1 => Ok(Identified {
            format: accepted[0],
            rejections,
        }),
        _ => Err(FormatError::Ambiguous(
            accepted.iter().map(|f| f.name().to_string()).collect(),
        )),
    }
}

/// Set of handlers, assembled once at startup and read-only afterwards
pub struct FormatRegistry {
    formats: Vec<Box<dyn Format>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self {
            formats: Vec::new(),
        }
    }

    /// Registry with the Dockerfile and compose handlers
    pub fn builtin() -> Self {
        Self::new()
            .with(Box::new(dockerfile::Dockerfile))
            .with(Box::new(compose::Compose))
    }

    pub fn with(mut self, format: Box<dyn Format>) -> Self {
        self.formats.push(format);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.formats.iter().map(|f| f.name()).collect()
    }

    /// Look a handler up by name (case-insensitive)
    pub fn get(&self, name: &str) -> Result<&dyn Format, FormatError> {
        self.formats
            .iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
            .map(|f| f.as_ref())
            .ok_or_else(|| FormatError::NotRegistered {
                name: name.to_string(),
                supported: self.names().join(", "),
            })
    }

    pub fn identify(
        &self,
        input: &str,
        filename: Option<&str>,
    ) -> Result<Identified<'_>, FormatError> {
        identify_format(&self.formats, input, filename)
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Byte range of one reference inside a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Occurrence {
    pub span: Range<usize>,
    pub line: usize,
}

pub(crate) fn parse_occurrence(
    format: &'static str,
    input: &str,
    occurrence: &Occurrence,
) -> Result<Reference, FormatError> {
    Reference::parse(&input[occurrence.span.clone()]).map_err(|source| FormatError::Reference {
        format,
        line: occurrence.line,
        source,
    })
}

/// Copy `input` to `output`, substituting each occurrence with the rewrite result
pub(crate) fn rewrite_occurrences(
    format: &'static str,
    input: &str,
    occurrences: &[Occurrence],
    output: &mut dyn Write,
    rewrite: &mut RewriteFn<'_>,
) -> Result<(), FormatError> {
    let mut pos = 0;
    for occurrence in occurrences {
        let reference = parse_occurrence(format, input, occurrence)?;
        let replacement = rewrite(&reference).map_err(FormatError::Rewrite)?;

        output.write_all(input[pos..occurrence.span.start].as_bytes())?;
        output.write_all(replacement.original().as_bytes())?;
        pos = occurrence.span.end;
    }
    output.write_all(input[pos..].as_bytes())?;
    Ok(())
}

/// 1-based line number of a byte offset
pub(crate) fn line_of(input: &str, offset: usize) -> usize {
    input[..offset].matches('\n').count() + 1
}
