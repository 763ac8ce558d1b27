use std::fmt;
use thiserror::Error;

use crate::reference::ReferenceError;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Unknown input format ({})", summarize(.0))]
    Unknown(Vec<Rejection>),

    #[error("Ambiguous input format: accepted by {}", .0.join(", "))]
    Ambiguous(Vec<String>),

    #[error("Unsupported format '{name}'. Supported: {supported}")]
    NotRegistered { name: String, supported: String },

    #[error("{format}: line {line}: {reason}")]
    Invalid {
        format: &'static str,
        line: usize,
        reason: String,
    },

    #[error("{format}: line {line}: {source}")]
    Reference {
        format: &'static str,
        line: usize,
        #[source]
        source: ReferenceError,
    },

    #[error("Failed to write output")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Rewrite(anyhow::Error),
}

/// Why one handler turned the input down
#[derive(Debug)]
pub struct Rejection {
    pub format: &'static str,
    pub error: FormatError,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.format, self.error)
    }
}

fn summarize(rejections: &[Rejection]) -> String {
    if rejections.is_empty() {
        return "no formats registered".to_string();
    }
    rejections
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
