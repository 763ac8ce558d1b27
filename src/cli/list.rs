use anyhow::{Context, Result};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Table};
use serde::Serialize;

use super::args::BackendArgs;
use super::exit::{NO_MATCH, SUCCESS};
use super::{backend_kind, ReferenceJson};
use crate::config::Config;
use crate::reference::{FormatMask, Reference};
use crate::resolver::{self, most_precise};

#[derive(Debug, Serialize)]
struct TagEntry {
    #[serde(flatten)]
    reference: ReferenceJson,
    most_precise: bool,
}

/// List every tag sharing the image of `reference`
pub async fn list_tags(
    config: &Config,
    reference: &str,
    backend: &BackendArgs,
    json: bool,
) -> Result<u8> {
    let reference = Reference::parse(reference)?;
    let kind = backend_kind(config, backend)?;

    let resolver = resolver::connect(kind, config)?;
    let tags = resolver
        .find_all_tags(&reference)
        .await
        .with_context(|| format!("Failed to list tags of {}", reference.original()))?;

    if tags.is_empty() {
        println!("No tags found for {}", reference.original());
        return Ok(NO_MATCH);
    }

    if json {
        println!("{}", render_json(&tags)?);
    } else {
        println!("{}", render_table(&tags));
    }
    Ok(SUCCESS)
}

fn precise_tag(tags: &[Reference]) -> Option<String> {
    most_precise(tags).map(|r| r.tag().to_string())
}

fn render_json(tags: &[Reference]) -> Result<String> {
    let precise = precise_tag(tags);
    let entries: Vec<TagEntry> = tags
        .iter()
        .map(|t| TagEntry {
            reference: ReferenceJson::from(&t.reformatted(FormatMask::CANONICAL)),
            most_precise: precise.as_deref() == Some(t.tag()),
        })
        .collect();
    serde_json::to_string_pretty(&entries).context("Failed to serialize tags")
}

fn render_table(tags: &[Reference]) -> Table {
    let precise = precise_tag(tags);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("TAG").add_attribute(Attribute::Bold),
            Cell::new("DIGEST").add_attribute(Attribute::Bold),
            Cell::new("PRECISE").add_attribute(Attribute::Bold),
        ]);

    for tag in tags {
        let marker = if precise.as_deref() == Some(tag.tag()) {
            "*"
        } else {
            ""
        };
        table.add_row(vec![
            Cell::new(tag.tag()),
            Cell::new(tag.digest()),
            Cell::new(marker),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "d21b9d7b5f8c3e6a7f0d3a1b2c4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60";

    fn tags() -> Vec<Reference> {
        ["1", "1.25", "latest"]
            .iter()
            .map(|t| Reference::parse(&format!("nginx:{}@sha256:{}", t, HEX)).unwrap())
            .collect()
    }

    #[test]
    fn test_render_json_marks_most_precise() {
        let value: serde_json::Value = serde_json::from_str(&render_json(&tags()).unwrap()).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
        assert_eq!(value[1]["tag"], "1.25");
        assert_eq!(value[1]["most_precise"], true);
        assert_eq!(value[0]["most_precise"], false);
        assert_eq!(
            value[1]["original"],
            format!("docker.io/library/nginx:1.25@sha256:{}", HEX)
        );
    }

    #[test]
    fn test_render_table() {
        let table = render_table(&tags()).to_string();
        assert!(table.contains("TAG"));
        assert!(table.contains("1.25"));
        assert!(table.contains(HEX));
    }

    #[tokio::test]
    async fn test_invalid_reference_is_usage_error() {
        let err = list_tags(&Config::default(), "Not A Ref", &BackendArgs::default(), false)
            .await
            .unwrap_err();
        assert_eq!(
            crate::cli::exit::exit_code(&err),
            crate::cli::exit::INVALID_PARAMS
        );
    }
}
