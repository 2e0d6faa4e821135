//! Locating and loading `passkit.toml`.
//!
//! Lookup order, first hit wins:
//!
//! 1. `--config PATH`
//! 2. `passkit.toml`, then `.passkit.toml`, in the project directory
//! 3. `config.toml` in the global directory (`$PASSKIT_CONFIG_DIR`, else
//!    `~/.passkit`)
//! 4. built-in defaults

use anyhow::{Context, Result};
use passkit_core::Config;
use std::path::{Path, PathBuf};

const PROJECT_FILES: [&str; 2] = ["passkit.toml", ".passkit.toml"];
const GLOBAL_FILE: &str = "config.toml";
const GLOBAL_DIR_ENV: &str = "PASSKIT_CONFIG_DIR";

/// Where the configuration comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConfigSource {
    /// Given with `--config`; not checked for existence.
    Explicit(PathBuf),
    /// Found in the project directory.
    Project(PathBuf),
    /// Found in the global directory.
    Global(PathBuf),
    /// Nothing found.
    Default,
}

impl ConfigSource {
    pub(crate) fn path(&self) -> Option<&Path> {
        match self {
            Self::Explicit(p) | Self::Project(p) | Self::Global(p) => Some(p),
            Self::Default => None,
        }
    }

    /// Reads the configuration this source points at.
    pub(crate) fn load(&self) -> Result<Config> {
        let Some(path) = self.path() else {
            return Ok(Config::default());
        };
        if matches!(self, Self::Global(_)) {
            tracing::info!("using global config {}", path.display());
        }
        Config::from_file(path).with_context(|| format!("failed to load config {}", path.display()))
    }
}

/// Resolves the configuration for `project_dir`.
pub(crate) fn resolve(project_dir: &Path, explicit: Option<&Path>) -> ConfigSource {
    resolve_with_global(project_dir, explicit, global_config_dir().as_deref())
}

fn resolve_with_global(
    project_dir: &Path,
    explicit: Option<&Path>,
    global_dir: Option<&Path>,
) -> ConfigSource {
    if let Some(path) = explicit {
        return ConfigSource::Explicit(path.to_path_buf());
    }
    if let Some(found) = PROJECT_FILES
        .iter()
        .map(|name| project_dir.join(name))
        .find(|candidate| candidate.is_file())
    {
        tracing::debug!("found project config {}", found.display());
        return ConfigSource::Project(found);
    }
    match global_dir.map(|dir| dir.join(GLOBAL_FILE)) {
        Some(found) if found.is_file() => {
            tracing::debug!("found global config {}", found.display());
            ConfigSource::Global(found)
        }
        _ => ConfigSource::Default,
    }
}

/// `$PASSKIT_CONFIG_DIR`, else `~/.passkit`.
pub(crate) fn global_config_dir() -> Option<PathBuf> {
    match std::env::var_os(GLOBAL_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => home::home_dir().map(|home| home.join(".passkit")),
    }
}
