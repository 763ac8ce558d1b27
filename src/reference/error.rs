use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("Malformed image reference '{input}': {reason}")]
    Malformed { input: String, reason: String },
}

impl ReferenceError {
    pub(crate) fn malformed(input: &str, reason: impl Into<String>) -> Self {
        ReferenceError::Malformed {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
