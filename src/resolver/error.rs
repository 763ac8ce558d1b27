use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Ambiguous reference '{reference}': matches {}", .candidates.join(", "))]
    Ambiguous {
        reference: String,
        candidates: Vec<String>,
    },

    #[error("Cannot resolve '{reference}': {reason}")]
    NotResolvable { reference: String, reason: String },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl ResolveError {
    pub(crate) fn not_resolvable(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        ResolveError::NotResolvable {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}
