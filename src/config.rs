//! Runtime configuration and the optional `tetra.toml` project file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the project file looked up next to a program.
pub const PROJECT_FILE: &str = "tetra.toml";

/// Default hard limit on executed instructions per run.
pub const DEFAULT_MAX_INSTRUCTIONS: usize = 10_000;

/// Runtime configuration for the VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Executions allowed before a run is aborted
    pub max_instructions: usize,
    /// Run the optimizer before executing
    pub optimize: bool,
    /// Write step diffs while running
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
            optimize: false,
            debug: false,
        }
    }
}

/// Image settings for `tetra render`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    /// Value bound to `iTime`
    pub time: f64,
    /// Worker threads (0 = one per available core)
    pub threads: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
            time: 0.0,
            threads: 0,
        }
    }
}

/// Project file (tetra.toml)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

impl ProjectConfig {
    /// Load `tetra.toml` from a directory. A missing file yields the defaults.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(PROJECT_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        Self::parse(&content).map_err(|source| Error::Config { path, source })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
