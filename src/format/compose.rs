// Compose file image references (`services.<name>.image`)

use std::collections::HashMap;
use std::io::Write;
use std::ops::Range;
use tracing::debug;

use super::{
    line_of, parse_occurrence, rewrite_occurrences, Format, FormatError, Occurrence, RewriteFn,
};

const NAME: &str = "compose";

pub struct Compose;

impl Format for Compose {
    fn name(&self) -> &'static str {
        NAME
    }

    fn validate_input(&self, input: &str, _filename: Option<&str>) -> Result<(), FormatError> {
        let document = parse_document(input)?;

        let has_services = document
            .as_mapping()
            .and_then(|m| m.get("services"))
            .is_some_and(|s| s.is_mapping());
        if !has_services {
            return Err(FormatError::Invalid {
                format: NAME,
                line: 1,
                reason: "missing top-level 'services' mapping".to_string(),
            });
        }

        for occurrence in image_occurrences(input, &service_images(&document)) {
            parse_occurrence(NAME, input, &occurrence)?;
        }
        Ok(())
    }

    fn process(
        &self,
        input: &str,
        output: &mut dyn Write,
        rewrite: &mut RewriteFn<'_>,
    ) -> Result<(), FormatError> {
        let images = service_images(&parse_document(input)?);
        rewrite_occurrences(NAME, input, &image_occurrences(input, &images), output, rewrite)
    }
}

fn parse_document(input: &str) -> Result<serde_yaml::Value, FormatError> {
    serde_yaml::from_str(input).map_err(|e| FormatError::Invalid {
        format: NAME,
        line: e.location().map(|l| l.line()).unwrap_or(1),
        reason: e.to_string(),
    })
}

/// `services.<name>.image` string values, keyed by service name
fn service_images(document: &serde_yaml::Value) -> HashMap<String, String> {
    document
        .get("services")
        .and_then(|s| s.as_mapping())
        .into_iter()
        .flatten()
        .filter_map(|(name, service)| {
            Some((
                name.as_str()?.to_string(),
                service.get("image")?.as_str()?.to_string(),
            ))
        })
        .collect()
}

/// Locate the `image` value of each service in the source text.
///
/// Only keys directly under a service are considered, in block or single-line
/// flow style. A located value is kept when its text equals the parsed value,
/// so aliases, anchors, tags, escapes and interpolated values are skipped.
fn image_occurrences(input: &str, images: &HashMap<String, String>) -> Vec<Occurrence> {
    let mut occurrences = Vec::new();
    let mut in_services = false;
    // (name, indent) of the current service
    let mut service: Option<(String, usize)> = None;
    let mut key_indent: Option<usize> = None;
    // Lines indented deeper than this belong to a block scalar
    let mut block: Option<usize> = None;

    let mut line_start = 0;
    for raw in input.split_inclusive('\n') {
        let start = line_start;
        line_start += raw.len();

        let line = raw.trim_end_matches(|c: char| c == '\n' || c == '\r');
        let content = line.trim_start_matches(' ');
        let indent = line.len() - content.len();
        if content.is_empty() || content.starts_with('#') {
            continue;
        }
        if let Some(parent) = block {
            if indent > parent {
                continue;
            }
            block = None;
        }

        if indent == 0 {
            in_services = false;
        }
        if service.as_ref().is_some_and(|(_, at)| indent <= *at) {
            service = None;
            key_indent = None;
        }

        let entry = split_key(content);
        let value = match entry {
            Some((_, at)) => &content[at..],
            None => content.strip_prefix("- ").unwrap_or(""),
        };
        if value.starts_with('|') || value.starts_with('>') {
            block = Some(indent);
        }

        let Some((key, at)) = entry else {
            continue;
        };
        let value_start = start + indent + at;

        let located = if indent == 0 {
            in_services = key == "services";
            None
        } else if !in_services {
            None
        } else if service.is_none() {
            service = Some((key.to_string(), indent));
            flow_image_span(value).map(|span| (key, span))
        } else {
            match (&service, *key_indent.get_or_insert(indent) == indent) {
                (Some((name, _)), true) if key == "image" => {
                    scalar_span(value, &[]).map(|span| (name.as_str(), span))
                }
                _ => None,
            }
        };

        if let Some((name, span)) = located {
            let span = value_start + span.start..value_start + span.end;
            let text = &input[span.clone()];
            if text.contains('$') || images.get(name).map(String::as_str) != Some(text) {
                debug!("Skipping image value '{}' of service {}", text, name);
                continue;
            }
            occurrences.push(Occurrence {
                line: line_of(input, span.start),
                span,
            });
        }
    }

    occurrences
}

/// Split a `key: value` line into the unquoted key and the offset of its value
fn split_key(content: &str) -> Option<(&str, usize)> {
    let (key, colon) = match content.chars().next()? {
        quote @ ('"' | '\'') => {
            let close = content[1..].find(quote)? + 1;
            let colon = skip_blank(content, close + 1);
            if !content[colon..].starts_with(':') {
                return None;
            }
            (&content[1..close], colon)
        }
        '-' | '#' | '{' | '[' | '&' | '*' | '!' | '|' | '>' | '?' => return None,
        _ => {
            let colon = content
                .match_indices(':')
                .map(|(i, _)| i)
                .find(|&i| is_blank_or_end(&content[i + 1..]))?;
            (content[..colon].trim_end(), colon)
        }
    };
    if !is_blank_or_end(&content[colon + 1..]) {
        return None;
    }
    Some((key, skip_blank(content, colon + 1)))
}

/// Span of a scalar value without its quotes. Aliases, anchors, tags, block
/// scalars and collections have none.
fn scalar_span(value: &str, terminators: &[char]) -> Option<Range<usize>> {
    match value.chars().next()? {
        quote @ ('"' | '\'') => value[1..].find(quote).map(|close| 1..1 + close),
        '&' | '*' | '!' | '|' | '>' | '{' | '[' | '#' => None,
        _ => {
            let end = value
                .find(|c: char| c.is_whitespace() || c == '#' || terminators.contains(&c))
                .unwrap_or(value.len());
            Some(0..end)
        }
    }
}

/// Span of the `image` value in a single-line flow mapping (`{image: nginx, ...}`)
fn flow_image_span(value: &str) -> Option<Range<usize>> {
    if !value.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut quote = None;
    for (i, c) in value.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return None;
                }
            }
            _ => {}
        }

        if depth == 1 && (c == '{' || c == ',') {
            let key = skip_blank(value, i + 1);
            if let Some(rest) = value[key..].strip_prefix("image") {
                let colon = skip_blank(value, value.len() - rest.len());
                if value[colon..].starts_with(':') {
                    let at = skip_blank(value, colon + 1);
                    return scalar_span(&value[at..], &[',', '}'])
                        .map(|span| at + span.start..at + span.end);
                }
            }
        }
    }
    None
}

fn skip_blank(text: &str, from: usize) -> usize {
    text[from..]
        .find(|c: char| c != ' ' && c != '\t')
        .map_or(text.len(), |i| from + i)
}

fn is_blank_or_end(text: &str) -> bool {
    text.chars().next().map_or(true, |c| c == ' ' || c == '\t')
}
