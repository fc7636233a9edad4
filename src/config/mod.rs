//! Project configuration.
//!
//! A project is configured from a YAML document whose top-level keys become
//! configuration attributes. Known keys are typed; anything else is kept in
//! [`ProjectConfig::extra`].

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigurationError;
use crate::logging::LoggingConfig;

/// Default configuration filename, resolved against the project root.
pub const DEFAULT_CONFIG_FILE: &str = "project.yml";

/// Default database engine when a project does not name one.
pub const DEFAULT_ENGINE_URI: &str = "memory://";

/// Configuration for a single project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub env_name: Option<String>,

    pub debug: bool,

    /// Revalidate cached templates against their modification time.
    pub template_filesystem_check: bool,

    /// Views directory (default `<root>/app/views`).
    pub template_path: Option<PathBuf>,

    /// Fallback views searched after the project views.
    pub default_template_path: Option<PathBuf>,

    /// Version tag copied onto every page.
    pub media_version: Option<String>,

    /// Values made available to every controller view.
    pub page_options: IndexMap<String, Value>,

    pub database_engine_uri: Option<String>,

    /// Directory holding static assets (default `<root>/content`).
    pub asset_path: Option<PathBuf>,

    pub logging: LoggingConfig,

    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl ProjectConfig {
    /// Build a configuration from an in-memory JSON object.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Look up an arbitrary top-level configuration value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn views_dir(&self, root: &Path) -> PathBuf {
        resolve(root, self.template_path.as_deref(), "app/views")
    }

    pub fn assets_dir(&self, root: &Path) -> PathBuf {
        resolve(root, self.asset_path.as_deref(), "content")
    }

    pub fn engine_uri(&self) -> &str {
        self.database_engine_uri
            .as_deref()
            .unwrap_or(DEFAULT_ENGINE_URI)
    }

    /// Whether the template cache must watch file modification times.
    pub fn filesystem_checks(&self) -> bool {
        self.template_filesystem_check || self.debug
    }
}

fn resolve(root: &Path, configured: Option<&Path>, default: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => root.join(path),
        None => root.join(default),
    }
}

/// Where a configuration comes from, in priority order.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// An explicit in-memory configuration.
    Object(ProjectConfig),
    /// A named file, relative to the project root unless absolute.
    File(PathBuf),
    /// `project.yml` in the project root.
    Default,
}

impl ConfigSource {
    /// Pick the source the way `configure` does: object, then file, then default.
    pub fn select(config_object: Option<ProjectConfig>, config_file: Option<PathBuf>) -> Self {
        match (config_object, config_file) {
            (Some(object), _) => Self::Object(object),
            (None, Some(file)) => Self::File(file),
            (None, None) => Self::Default,
        }
    }

    pub fn load(self, root: &Path) -> Result<ProjectConfig, ConfigurationError> {
        match self {
            Self::Object(config) => Ok(config),
            Self::File(file) => build_config(root, &file),
            Self::Default => build_config(root, Path::new(DEFAULT_CONFIG_FILE)),
        }
    }
}

/// Read and parse a configuration file.
pub fn build_config(root: &Path, filename: &Path) -> Result<ProjectConfig, ConfigurationError> {
    let path = if filename.is_absolute() {
        filename.to_path_buf()
    } else {
        root.join(filename)
    };

    let source = fs::read_to_string(&path).map_err(|source| {
        tracing::error!(path = %path.display(), "Problem loading config file");
        ConfigurationError::ReadConfig {
            path: path.clone(),
            source,
        }
    })?;

    // An empty document is an empty configuration.
    if source.trim().is_empty() {
        return Ok(ProjectConfig::default());
    }

    serde_yaml::from_str(&source).map_err(|source| ConfigurationError::ParseConfig { path, source })
}
