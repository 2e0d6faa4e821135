//! The package loader interface and pattern matching.

mod manifest;

pub use manifest::{ManifestLoader, MANIFEST_FILE};

use crate::package::Package;
use crate::source::FileSetFull;
use std::path::PathBuf;
use std::sync::Arc;

/// How much of the dependency graph must be loaded from source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Only the requested packages are type-checked from source; their
    /// dependencies contribute declarations only.
    #[default]
    Roots,
    /// Every package in the import closure is type-checked from source,
    /// as needed by analyzers that propagate facts.
    AllSyntax,
}

/// Errors that prevent loading altogether.
///
/// Problems with individual packages are attached to the package as
/// [`LoadError`](crate::LoadError)s instead.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// Reading a file or directory failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The workspace manifest is missing or invalid.
    #[error("invalid workspace manifest {path}: {message}")]
    Manifest {
        /// Manifest path.
        path: PathBuf,
        /// Parse or validation message.
        message: String,
    },

    /// No manifest was found above the starting directory.
    #[error("no {} found in {} or any parent directory", MANIFEST_FILE, start.display())]
    NotFound {
        /// Where the search started.
        start: PathBuf,
    },

    /// Packages import each other in a cycle.
    #[error("import cycle not allowed: {}", .0.join(" -> "))]
    ImportCycle(Vec<String>),

    /// The loaded sources exceed the position space.
    #[error(transparent)]
    FileSetFull(#[from] FileSetFull),

    /// Loading was cancelled.
    #[error("loading cancelled")]
    Cancelled,
}

/// Produces loaded packages for a list of patterns.
pub trait Loader {
    /// Loads the packages matching `patterns`.
    ///
    /// Returned packages are the ones the patterns denote; their imports
    /// are reachable through [`Package::imports`].
    ///
    /// # Errors
    ///
    /// Returns an error when loading cannot proceed at all.
    fn load(&self, patterns: &[String], mode: LoadMode) -> Result<Vec<Arc<Package>>, LoaderError>;
}

/// A parsed package pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// `...`: every package.
    All,
    /// `prefix/...`: the package `prefix` and everything below it.
    Prefix(String),
    /// `file=PATH`: the packages containing a file.
    File(PathBuf),
    /// An exact import path.
    Exact(String),
}

impl Pattern {
    /// Parses a command-line pattern.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        if let Some(path) = pattern.strip_prefix("file=") {
            return Self::File(PathBuf::from(path));
        }
        if pattern == "..." || pattern == "./..." {
            return Self::All;
        }
        match pattern.strip_suffix("/...") {
            Some(prefix) => Self::Prefix(prefix.trim_start_matches("./").to_string()),
            None => Self::Exact(pattern.trim_start_matches("./").to_string()),
        }
    }

    /// Returns true if the pattern can match several packages.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::All | Self::Prefix(_))
    }

    /// Returns true if the import path `path` matches (file patterns never
    /// match by path).
    #[must_use]
    pub fn matches_path(&self, path: &str) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(prefix) => {
                path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            Self::Exact(exact) => path == exact,
            Self::File(_) => false,
        }
    }
}
