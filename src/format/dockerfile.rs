// Dockerfile image references
//
// Line-oriented scanner that understands just enough Dockerfile syntax to find
// image references: parser directives, comments, line continuations and
// heredocs. References come from `FROM <image>` and `COPY --from=<image>`.

use std::collections::HashSet;
use std::io::Write;
use tracing::debug;

use super::{
    line_of, parse_occurrence, rewrite_occurrences, Format, FormatError, Occurrence, RewriteFn,
};

const NAME: &str = "dockerfile";

const INSTRUCTIONS: &[&str] = &[
    "ADD",
    "ARG",
    "CMD",
    "COPY",
    "ENTRYPOINT",
    "ENV",
    "EXPOSE",
    "FROM",
    "HEALTHCHECK",
    "LABEL",
    "MAINTAINER",
    "ONBUILD",
    "RUN",
    "SHELL",
    "STOPSIGNAL",
    "USER",
    "VOLUME",
    "WORKDIR",
];

/// Instructions whose arguments may open heredocs
const HEREDOC_INSTRUCTIONS: &[&str] = &["RUN", "COPY", "ADD"];

pub struct Dockerfile;

impl Format for Dockerfile {
    fn name(&self) -> &'static str {
        NAME
    }

    fn validate_input(&self, input: &str, filename: Option<&str>) -> Result<(), FormatError> {
        debug!(
            "Validating {} as Dockerfile",
            filename.unwrap_or("<stdin>")
        );
        let instructions = parse_instructions(input)?;
        check_structure(&instructions)?;
        for occurrence in image_occurrences(&instructions)? {
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
        let instructions = parse_instructions(input)?;
        let occurrences = image_occurrences(&instructions)?;
        rewrite_occurrences(NAME, input, &occurrences, output, rewrite)
    }
}

/// Whitespace-delimited word with its byte offset in the document
#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    text: &'a str,
    start: usize,
}

#[derive(Debug)]
struct Instruction<'a> {
    keyword: String,
    line: usize,
    args: Vec<Token<'a>>,
}

struct Heredoc {
    delimiter: String,
    strip_tabs: bool,
}

fn invalid(line: usize, reason: impl Into<String>) -> FormatError {
    FormatError::Invalid {
        format: NAME,
        line,
        reason: reason.into(),
    }
}

fn tokenize(segment: &str, base: usize) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in segment.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                tokens.push(Token {
                    text: &segment[s..i],
                    start: base + s,
                });
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push(Token {
            text: &segment[s..],
            start: base + s,
        });
    }
    tokens
}

/// Parse `# key=value` parser directive lines
fn parse_directive(line: &str) -> Option<(String, String)> {
    let body = line.trim().strip_prefix('#')?;
    let (key, value) = body.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((key.to_ascii_lowercase(), value.trim().to_string()))
}

fn parse_heredoc(token: &str) -> Option<Heredoc> {
    let rest = token.strip_prefix("<<")?;
    let (rest, strip_tabs) = match rest.strip_prefix('-') {
        Some(r) => (r, true),
        None => (rest, false),
    };
    let delimiter = rest.trim_matches(|c| c == '"' || c == '\'');
    if delimiter.is_empty() || !delimiter.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some(Heredoc {
        delimiter: delimiter.to_string(),
        strip_tabs,
    })
}

/// Split the document into logical instructions, keeping byte offsets.
fn parse_instructions(input: &str) -> Result<Vec<Instruction<'_>>, FormatError> {
    let mut instructions = Vec::new();
    let mut escape = '\\';
    let mut directives_open = true;
    let mut heredocs: Vec<Heredoc> = Vec::new();
    let mut current: Option<Instruction<'_>> = None;
    let mut offset = 0;

    for (index, raw) in input.split_inclusive('\n').enumerate() {
        let line_no = index + 1;
        let base = offset;
        offset += raw.len();
        let content = raw.trim_end_matches(['\n', '\r']);

        if let Some(heredoc) = heredocs.first() {
            let candidate = if heredoc.strip_tabs {
                content.trim_start_matches('\t')
            } else {
                content
            };
            if candidate == heredoc.delimiter {
                heredocs.remove(0);
            }
            continue;
        }

        if directives_open {
            match parse_directive(content) {
                Some((key, value)) => {
                    if key == "escape" {
                        escape = match value.as_str() {
                            "\\" => '\\',
                            "`" => '`',
                            other => {
                                return Err(invalid(
                                    line_no,
                                    format!("invalid escape directive '{}'", other),
                                ))
                            }
                        };
                    }
                    continue;
                }
                None => directives_open = false,
            }
        }

        let trimmed = content.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (segment, continues) = match content.trim_end().strip_suffix(escape) {
            Some(segment) => (segment, true),
            None => (content, false),
        };
        let mut tokens = tokenize(segment, base);

        let instruction = match current.take() {
            Some(mut instruction) => {
                instruction.args.append(&mut tokens);
                instruction
            }
            None => {
                if tokens.is_empty() {
                    continue;
                }
                let keyword = tokens.remove(0);
                Instruction {
                    keyword: keyword.text.to_ascii_uppercase(),
                    line: line_no,
                    args: tokens,
                }
            }
        };

        if continues {
            current = Some(instruction);
            continue;
        }

        if HEREDOC_INSTRUCTIONS.contains(&instruction.keyword.as_str()) {
            heredocs.extend(instruction.args.iter().filter_map(|t| parse_heredoc(t.text)));
        }
        instructions.push(instruction);
    }

    if let Some(instruction) = current {
        instructions.push(instruction);
    }
    if let Some(heredoc) = heredocs.first() {
        return Err(invalid(
            line_of(input, input.len()),
            format!("unterminated heredoc '{}'", heredoc.delimiter),
        ));
    }

    Ok(instructions)
}

/// Known keywords only, and a FROM before anything but ARG
fn check_structure(instructions: &[Instruction<'_>]) -> Result<(), FormatError> {
    for instruction in instructions {
        if !INSTRUCTIONS.contains(&instruction.keyword.as_str()) {
            return Err(invalid(
                instruction.line,
                format!("unknown instruction '{}'", instruction.keyword),
            ));
        }
    }

    match instructions.iter().find(|i| i.keyword != "ARG") {
        Some(first) if first.keyword == "FROM" => Ok(()),
        Some(first) => Err(invalid(
            first.line,
            format!("expected FROM before {}", first.keyword),
        )),
        None => Err(invalid(1, "no FROM instruction")),
    }
}

/// Stage names, numeric stage indexes, `scratch` and build-arg substitutions are not images
fn is_image(text: &str, stages: &HashSet<String>) -> bool {
    if text.contains('$') {
        debug!("Skipping '{}': contains a build argument", text);
        return false;
    }
    !text.eq_ignore_ascii_case("scratch")
        && !text.chars().all(|c| c.is_ascii_digit())
        && !stages.contains(&text.to_ascii_lowercase())
}

fn image_occurrences(instructions: &[Instruction<'_>]) -> Result<Vec<Occurrence>, FormatError> {
    let mut stages = HashSet::new();
    let mut occurrences = Vec::new();

    for instruction in instructions {
        match instruction.keyword.as_str() {
            "FROM" => {
                let mut args = instruction
                    .args
                    .iter()
                    .skip_while(|t| t.text.starts_with("--"));
                let image = args
                    .next()
                    .ok_or_else(|| invalid(instruction.line, "FROM requires an image"))?;

                if is_image(image.text, &stages) {
                    occurrences.push(Occurrence {
                        span: image.start..image.start + image.text.len(),
                        line: instruction.line,
                    });
                }

                if let Some(keyword) = args.next() {
                    if !keyword.text.eq_ignore_ascii_case("as") {
                        return Err(invalid(
                            instruction.line,
                            format!("unexpected '{}' after FROM image", keyword.text),
                        ));
                    }
                    let stage = args
                        .next()
                        .ok_or_else(|| invalid(instruction.line, "missing stage name after AS"))?;
                    stages.insert(stage.text.to_ascii_lowercase());
                }
            }
            "COPY" => {
                for flag in instruction.args.iter().take_while(|t| t.text.starts_with("--")) {
                    if let Some(source) = flag.text.strip_prefix("--from=") {
                        if !source.is_empty() && is_image(source, &stages) {
                            let start = flag.start + "--from=".len();
                            occurrences.push(Occurrence {
                                span: start..start + source.len(),
                                line: instruction.line,
                            });
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Ok(occurrences)
}
