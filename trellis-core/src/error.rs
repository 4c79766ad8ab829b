//! Error types for the trellis engine.
//!
//! These errors cover the host-facing API surface: path lookups, registry
//! operations, flow management, and storage. Failures that occur *inside* a
//! running function are not errors at this level; they travel through the
//! graph as [`Event`](crate::event::Event) values so that downstream blocks
//! can react to them like any other data.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for trellis operations.
#[derive(Error, Debug)]
pub enum EngineError {
    // =========================================================================
    // Path Errors (E001-E099)
    // =========================================================================
    /// A path string could not be parsed.
    #[error("E001: Invalid path {path:?}: {cause}")]
    PathSyntax {
        /// The offending path.
        path: String,
        /// Reason the path could not be parsed.
        cause: String,
    },

    /// A path did not resolve to an existing property or block.
    #[error("E002: Path {path:?} does not resolve")]
    PathUnresolved {
        /// The path that failed to resolve.
        path: String,
    },

    /// A path operation required graph context that was not available.
    ///
    /// Raised by the textual path helpers when asked to combine paths across
    /// a root-flow (`###`) boundary, which cannot be done by string
    /// manipulation alone.
    #[error("E003: Path {path:?} requires graph context to resolve")]
    PathNeedsContext {
        /// The path that cannot be handled textually.
        path: String,
    },

    // =========================================================================
    // Registry Errors (E101-E199)
    // =========================================================================
    /// No function is registered under the requested type id.
    #[error("E101: Unknown function type {type_id:?}")]
    UnknownFunction {
        /// The requested registry key.
        type_id: String,
    },

    /// A descriptor references a base type that is not registered.
    #[error("E102: Function {type_id:?} declares unknown base {base:?}")]
    UnknownBase {
        /// The descriptor being registered or resolved.
        type_id: String,
        /// The missing base type id.
        base: String,
    },

    // =========================================================================
    // Graph Errors (E201-E299)
    // =========================================================================
    /// A block handle is stale or was never valid.
    #[error("E201: Block {block} no longer exists")]
    BlockGone {
        /// Display form of the stale handle.
        block: String,
    },

    /// The value at a path was expected to be a block.
    #[error("E202: Value at {path:?} is not a block")]
    NotABlock {
        /// The path that was inspected.
        path: String,
    },

    // =========================================================================
    // Flow Errors (E301-E399)
    // =========================================================================
    /// A flow with this name already exists under the root.
    #[error("E301: Flow {name:?} already exists")]
    FlowExists {
        /// The conflicting flow name.
        name: String,
    },

    /// No flow with this name exists under the root.
    #[error("E302: Flow {name:?} not found")]
    FlowNotFound {
        /// The requested flow name.
        name: String,
    },

    /// Serialized flow data was structurally invalid.
    #[error("E303: Malformed flow data for {name:?}: {cause}")]
    MalformedFlow {
        /// The flow being loaded.
        name: String,
        /// What was wrong with the data.
        cause: String,
    },

    // =========================================================================
    // Storage Errors (E401-E499)
    // =========================================================================
    /// A storage backend read or write failed.
    #[error("E401: Storage operation on {key:?} failed: {cause}")]
    Storage {
        /// The storage key involved.
        key: String,
        /// The underlying failure.
        cause: String,
    },

    /// Storage root directory could not be prepared.
    #[error("E402: Cannot use storage directory {path}: {cause}")]
    StorageDir {
        /// The directory that could not be used.
        path: PathBuf,
        /// The underlying failure.
        cause: String,
    },

    /// Flow data could not be serialized or deserialized.
    #[error("E403: Serialization failed for {key:?}: {cause}")]
    Serialization {
        /// The storage key involved.
        key: String,
        /// The serde failure.
        cause: String,
    },
}

impl EngineError {
    /// Get the error code for this error (useful for logging and metrics).
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathSyntax { .. } => "E001",
            Self::PathUnresolved { .. } => "E002",
            Self::PathNeedsContext { .. } => "E003",
            Self::UnknownFunction { .. } => "E101",
            Self::UnknownBase { .. } => "E102",
            Self::BlockGone { .. } => "E201",
            Self::NotABlock { .. } => "E202",
            Self::FlowExists { .. } => "E301",
            Self::FlowNotFound { .. } => "E302",
            Self::MalformedFlow { .. } => "E303",
            Self::Storage { .. } => "E401",
            Self::StorageDir { .. } => "E402",
            Self::Serialization { .. } => "E403",
        }
    }
}

/// Result type alias using `EngineError`.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    /// Convert any displayable error into a storage error for `key`.
    fn with_key(self, key: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn with_key(self, key: &str) -> Result<T> {
        self.map_err(|e| EngineError::Storage {
            key: key.to_string(),
            cause: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_correct() {
        let err = EngineError::PathSyntax {
            path: "a..b".to_string(),
            cause: "empty segment".to_string(),
        };
        assert_eq!(err.code(), "E001");

        let err = EngineError::UnknownFunction {
            type_id: "math:bogus".to_string(),
        };
        assert_eq!(err.code(), "E101");

        let err = EngineError::FlowNotFound {
            name: "main".to_string(),
        };
        assert_eq!(err.code(), "E302");
    }

    #[test]
    fn error_messages_include_context() {
        let err = EngineError::MalformedFlow {
            name: "main".to_string(),
            cause: "#is must be a string".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("E303"));
        assert!(msg.contains("main"));
        assert!(msg.contains("#is must be a string"));
    }

    #[test]
    fn result_ext_wraps_into_storage_error() {
        let io: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        ));
        let wrapped = io.with_key("flows/main");
        match wrapped {
            Err(EngineError::Storage { key, cause }) => {
                assert_eq!(key, "flows/main");
                assert!(cause.contains("no such file"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
