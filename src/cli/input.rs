use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The input file (or stdin) could not be read
#[derive(Debug, Error)]
#[error("Could not open {name}")]
pub struct OpenError {
    pub name: String,
    #[source]
    pub source: io::Error,
}

/// One document read fully into memory
#[derive(Debug)]
pub struct Document {
    /// Path on disk, `None` for stdin
    pub path: Option<PathBuf>,
    pub content: String,
}

impl Document {
    /// Name shown in log messages and handed to format detection
    pub fn name(&self) -> Option<&str> {
        self.path.as_deref().and_then(Path::to_str)
    }
}

/// Read `file`, where `-` means stdin
pub fn read_document(file: &str) -> Result<Document, OpenError> {
    if file == "-" {
        let mut content = String::new();
        io::stdin()
            .read_to_string(&mut content)
            .map_err(|source| OpenError {
                name: "<stdin>".to_string(),
                source,
            })?;
        return Ok(Document {
            path: None,
            content,
        });
    }

    let path = PathBuf::from(file);
    let content = fs::read_to_string(&path).map_err(|source| OpenError {
        name: file.to_string(),
        source,
    })?;
    Ok(Document {
        path: Some(path),
        content,
    })
}
