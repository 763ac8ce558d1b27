// Predicate-driven passes over a document

use std::io::{self, Write};

use super::{Format, FormatError};
use crate::predicate::Predicate;
use crate::reference::Reference;

/// Collect the references matching `predicate`, in document order with duplicates kept.
pub fn accumulate(
    format: &dyn Format,
    input: &str,
    predicate: &Predicate,
) -> Result<Vec<Reference>, FormatError> {
    let mut matches = Vec::new();
    format.process(input, &mut io::sink(), &mut |reference: &Reference| -> anyhow::Result<Reference> {
        if predicate.matches(reference) {
            matches.push(reference.clone());
        }
        Ok(reference.clone())
    })?;
    Ok(matches)
}

/// Rewrite every matching reference through `transform` and write the document to `output`.
///
/// Non-matching references pass through unchanged. The document is buffered and
/// nothing reaches `output` unless every transform succeeds.
pub fn accumulate_and_rewrite<F>(
    format: &dyn Format,
    input: &str,
    predicate: &Predicate,
    output: &mut dyn Write,
    mut transform: F,
) -> Result<Vec<Reference>, FormatError>
where
    F: FnMut(&Reference) -> anyhow::Result<Reference>,
{
    let mut buffer = Vec::with_capacity(input.len());
    let mut matches = Vec::new();

    format.process(input, &mut buffer, &mut |reference: &Reference| -> anyhow::Result<Reference> {
        if !predicate.matches(reference) {
            return Ok(reference.clone());
        }
        matches.push(reference.clone());
        transform(reference)
    })?;

    output.write_all(&buffer)?;
    output.flush()?;
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::dockerfile::Dockerfile;
    use crate::reference::FormatMask;

    const HEX: &str = "d21b9d7b5f8c3e6a7f0d3a1b2c4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60";

    #[test]
    fn test_accumulate_any() {
        let matches = accumulate(&Dockerfile, "FROM nginx\n", &Predicate::Any).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].formatted(FormatMask::FAMILIAR), "nginx");
    }

    #[test]
    fn test_accumulate_latest_excludes_explicit_tag() {
        let matches = accumulate(&Dockerfile, "FROM nginx:1.2\n", &Predicate::Latest).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_duplicates_preserved_in_order() {
        let input = "FROM alpine AS a\nFROM nginx\nFROM alpine\n";
        let matches: Vec<String> = accumulate(&Dockerfile, input, &Predicate::Any)
            .unwrap()
            .iter()
            .map(|r| r.original().to_string())
            .collect();
        assert_eq!(matches, vec!["alpine", "nginx", "alpine"]);
    }

    #[test]
    fn test_identity_rewrite_is_byte_exact() {
        let input = "# comment\nFROM  nginx:1.25   AS web\n\nRUN echo  hi \nFROM redis\n";
        let mut out = Vec::new();
        accumulate_and_rewrite(&Dockerfile, input, &Predicate::Any, &mut out, |r| {
            Ok(r.clone())
        })
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), input);
    }

    #[test]
    fn test_rewrite_pins_matches_only() {
        let input = "FROM nginx\nFROM redis:7\nFROM alpine:3.19\n";
        let predicate = Predicate::tags(["", "7"]);
        let mut out = Vec::new();
        let matches = accumulate_and_rewrite(&Dockerfile, input, &predicate, &mut out, |r| {
            Ok(r.with_digest(HEX)?.reformatted(FormatMask::NAME_DIGEST))
        })
        .unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!(
                "FROM nginx@sha256:{h}\nFROM redis@sha256:{h}\nFROM alpine:3.19\n",
                h = HEX
            )
        );
    }

    #[test]
    fn test_transform_error_leaves_output_empty() {
        let input = "FROM nginx\nFROM redis\n";
        let mut out = Vec::new();
        let mut calls = 0;
        let err = accumulate_and_rewrite(&Dockerfile, input, &Predicate::Any, &mut out, |r| {
            calls += 1;
            if r.original() == "redis" {
                anyhow::bail!("cannot resolve redis");
            }
            Ok(r.clone())
        })
        .unwrap_err();

        assert!(matches!(err, FormatError::Rewrite(_)));
        assert_eq!(calls, 2);
        assert!(out.is_empty());
    }
}
