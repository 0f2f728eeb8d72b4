use thiserror::Error;

/// Errors raised while resolving and applying COPY/ADD sources
#[derive(Error, Debug)]
pub enum BuildError {
    /// Source path absent from a prior image layer or download
    #[error("stat {path}: file does not exist")]
    NotFound { path: String },

    /// Source path absent from the local build context
    #[error("file not found in build context or excluded by .dockerignore: stat {path}: file does not exist")]
    MissingFromContext { path: String },

    /// Instruction cannot be satisfied as written
    #[error("{0}")]
    InvalidInstruction(String),

    /// Source string is not a usable URL
    #[error("invalid source {source_url}: {message}")]
    InvalidSource { source_url: String, message: String },

    /// Remote source download failed
    #[error("failed to GET {url} with status {status_code}: {message}")]
    FetchFailed {
        url: String,
        status_code: u16,
        message: String,
    },

    /// Operation aborted by an external cancellation signal
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Copy or extraction failed at execution time
    #[error("failed to {op}: {message}")]
    CopyFailed { op: String, message: String },

    /// Ownership lookup or remapping failed
    #[error("ownership error: {0}")]
    Ownership(String),

    /// Read-write layer could not be created or released
    #[error("layer error: {0}")]
    Layer(String),

    /// Failure of a whole instruction, prefixed with its command name
    #[error("{command} failed: {source}")]
    Instruction {
        command: String,
        source: Box<BuildError>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Wrap an error with the name of the instruction that produced it.
    pub fn in_instruction(self, command: &str) -> Self {
        BuildError::Instruction {
            command: command.to_string(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) reports a missing source.
    pub fn is_not_found(&self) -> bool {
        match self {
            BuildError::NotFound { .. } | BuildError::MissingFromContext { .. } => true,
            BuildError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            BuildError::Instruction { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        BuildError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for BuildError {
    fn from(err: serde_yaml::Error) -> Self {
        BuildError::Serialization(err.to_string())
    }
}

/// Result type alias for build operations
pub type Result<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display_uses_relative_path() {
        let error = BuildError::NotFound {
            path: "app/main.py".to_string(),
        };
        assert_eq!(error.to_string(), "stat app/main.py: file does not exist");
    }

    #[test]
    fn test_missing_from_context_display() {
        let error = BuildError::MissingFromContext {
            path: "foo".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "file not found in build context or excluded by .dockerignore: stat foo: file does not exist"
        );
    }

    #[test]
    fn test_instruction_wrapper_display() {
        let error = BuildError::InvalidInstruction("no source files were specified".to_string())
            .in_instruction("COPY");
        assert_eq!(error.to_string(), "COPY failed: no source files were specified");
    }

    #[test]
    fn test_is_not_found_through_wrapper() {
        let error = BuildError::MissingFromContext {
            path: "foo".to_string(),
        }
        .in_instruction("ADD");
        assert!(error.is_not_found());

        let other = BuildError::Ownership("bad".to_string()).in_instruction("ADD");
        assert!(!other.is_not_found());
    }

    #[test]
    fn test_fetch_failed_display() {
        let error = BuildError::FetchFailed {
            url: "https://example.com/a.tar".to_string(),
            status_code: 404,
            message: "Not Found".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "failed to GET https://example.com/a.tar with status 404: Not Found"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: BuildError = io_error.into();
        assert!(matches!(error, BuildError::Io(_)));
        assert!(error.is_not_found());
    }

    #[test]
    fn test_copy_failed_display() {
        let error = BuildError::CopyFailed {
            op: "copy directory".to_string(),
            message: "disk full".to_string(),
        };
        assert_eq!(error.to_string(), "failed to copy directory: disk full");
    }
}
