// Process exit codes

use thiserror::Error;

use super::input::OpenError;
use crate::format::FormatError;
use crate::predicate::PredicateError;
use crate::reference::ReferenceError;

pub const SUCCESS: u8 = 0;
pub const NO_MATCH: u8 = 1;
pub const INVALID_PARAMS: u8 = 2;
pub const INVALID_FORMAT: u8 = 3;
pub const COULD_NOT_OPEN: u8 = 4;
pub const FAILURE: u8 = 5;

/// Invalid command-line parameter that clap cannot check by itself
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UsageError(pub String);

impl UsageError {
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        UsageError(format!("{:#}", err))
    }
}

/// Map an error to its exit code by the first recognized error in its chain
pub fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if cause.is::<UsageError>()
            || cause.is::<PredicateError>()
            || cause.is::<ReferenceError>()
        {
            return INVALID_PARAMS;
        }
        if cause.is::<OpenError>() {
            return COULD_NOT_OPEN;
        }
        if let Some(format_error) = cause.downcast_ref::<FormatError>() {
            return match format_error {
                FormatError::Io(_) | FormatError::Rewrite(_) => FAILURE,
                _ => INVALID_FORMAT,
            };
        }
    }
    FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolveError;
    use anyhow::Context;

    #[test]
    fn test_exit_codes() {
        let usage = anyhow::Error::new(UsageError("bad".into()));
        assert_eq!(exit_code(&usage), INVALID_PARAMS);

        let conflict = anyhow::Error::new(PredicateError::InvalidFilter {
            value: "x".into(),
            reason: "y".into(),
        })
        .context("Invalid filters");
        assert_eq!(exit_code(&conflict), INVALID_PARAMS);

        let unknown = anyhow::Error::new(FormatError::Unknown(vec![]));
        assert_eq!(exit_code(&unknown), INVALID_FORMAT);

        let open = anyhow::Error::new(OpenError {
            name: "Dockerfile".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        assert_eq!(exit_code(&open), COULD_NOT_OPEN);

        let resolve: anyhow::Result<()> = Err(ResolveError::NotResolvable {
            reference: "nginx".into(),
            reason: "not found".into(),
        })
        .context("Failed to pin nginx");
        assert_eq!(exit_code(&resolve.unwrap_err()), FAILURE);
    }

    #[test]
    fn test_reference_error_inside_format_error_is_a_format_error() {
        let source = crate::reference::Reference::parse("Bad").unwrap_err();
        let err = anyhow::Error::new(FormatError::Reference {
            format: "dockerfile",
            line: 1,
            source,
        });
        assert_eq!(exit_code(&err), INVALID_FORMAT);
    }
}
