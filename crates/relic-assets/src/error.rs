//! Error types for the asset system.

use relic_core::dispatch::DispatchError;

use crate::format::AssetFormat;

/// Errors that can occur during asset operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    /// The requested path resolves to no asset, or the asset failed to load.
    #[error("Asset \"{path}\" could not be found in {manager}.")]
    NotFound {
        /// The relative path of the asset.
        path: String,
        /// Display name of the manager that was searched.
        manager: String,
    },

    /// The asset exists but is not of the requested type.
    #[error("Could not cast asset '{path}' of type {actual} to {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// The asset's bytes could not be turned into an in-memory asset.
    #[error("Failed to decode '{path}': {message}")]
    Decode { path: String, message: String },

    /// The asset's format is recognised but cannot be loaded.
    #[error("Asset \"{path}\" is of unsupported format {format}.")]
    UnsupportedFormat { path: String, format: AssetFormat },

    /// The asset's format could not be determined.
    #[error("Asset \"{path}\" is of unknown type.")]
    UnknownType { path: String },

    /// Failed to read asset data from the source.
    #[error("IO error loading '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A `.meta` file did not contain valid metadata.
    #[error("Invalid metadata for '{path}': {source}")]
    InvalidMetadata {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The archive file exists but is not a readable zip archive.
    #[error("Failed to open archive {archive}: {source}")]
    Archive {
        archive: String,
        #[source]
        source: zip::result::ZipError,
    },

    /// The manager was used after [`AssetManager::dispose`](crate::AssetManager::dispose).
    #[error("{manager} has been disposed.")]
    Disposed { manager: String },

    /// Another manager is already registered under the prefix.
    #[error("Prefix \"{prefix}\" is already in use.")]
    PrefixInUse { prefix: String },

    /// The manager is already registered, under `prefix`.
    #[error("The asset manager is already registered under prefix \"{prefix}\".")]
    AlreadyRegistered { prefix: String },

    /// No manager is registered under the prefix.
    #[error("No asset manager is registered under prefix \"{prefix}\".")]
    UnknownPrefix { prefix: String },

    /// One or more reload listeners failed.
    #[error("Asset reload listeners failed: {0}")]
    Listener(#[from] DispatchError),

    /// The file watcher could not be created or attached.
    #[cfg(feature = "hot-reload")]
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl AssetError {
    pub fn not_found(path: impl Into<String>, manager: impl Into<String>) -> Self {
        AssetError::NotFound {
            path: path.into(),
            manager: manager.into(),
        }
    }

    pub fn decode(path: impl Into<String>, message: impl ToString) -> Self {
        AssetError::Decode {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AssetError::NotFound { .. })
    }

    /// Whether this error is absorbed at the resolution boundary and reported
    /// to callers as [`AssetError::NotFound`].
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AssetError::Decode { .. } | AssetError::Io { .. } | AssetError::InvalidMetadata { .. }
        )
    }
}

/// Result type alias for asset operations.
pub type AssetResult<T> = Result<T, AssetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = AssetError::not_found("sprites/hero", "FileSystem (assets)");
        assert_eq!(err.to_string(), "Asset \"sprites/hero\" could not be found in FileSystem (assets).");

        let err = AssetError::TypeMismatch {
            path: "sprites/hero".into(),
            expected: "AudioClip",
            actual: "Sprite",
        };
        assert_eq!(err.to_string(), "Could not cast asset 'sprites/hero' of type Sprite to AudioClip");

        let err = AssetError::UnknownType { path: "x".into() };
        assert_eq!(err.to_string(), "Asset \"x\" is of unknown type.");
    }

    #[test]
    fn test_recoverable() {
        assert!(AssetError::decode("a", "bad png").is_recoverable());
        assert!(!AssetError::UnknownType { path: "a".into() }.is_recoverable());
        assert!(!AssetError::UnsupportedFormat {
            path: "a".into(),
            format: AssetFormat::Mp4
        }
        .is_recoverable());
        assert!(AssetError::not_found("a", "b").is_not_found());
    }
}
