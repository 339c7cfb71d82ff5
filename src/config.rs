//! Coordinator configuration.
//!
//! Loaded from an optional `delivery.yaml` in the working directory. All
//! fields default so a missing file means default behavior, and unknown
//! keys fail loudly instead of being silently ignored.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::instance::{GateKind, PhaseName};

/// The configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "delivery.yaml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Which phases carry a gate, and of what kind.
    #[serde(default = "default_gates")]
    pub gates: BTreeMap<PhaseName, GateKind>,
    /// How many times a mutating command reloads and retries after an
    /// optimistic-version conflict before giving up.
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
    /// Overrides the home-based state directory. Mostly useful for tests
    /// and sandboxed setups.
    #[serde(default)]
    pub state_root: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            gates: default_gates(),
            conflict_retries: default_conflict_retries(),
            state_root: None,
        }
    }
}

fn default_gates() -> BTreeMap<PhaseName, GateKind> {
    let mut gates = BTreeMap::new();
    gates.insert(PhaseName::Validation, GateKind::Manual);
    gates.insert(PhaseName::Deployment, GateKind::Manual);
    gates
}

fn default_conflict_retries() -> u32 {
    5
}

impl CoordinatorConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Loads `delivery.yaml` from the working directory, or the defaults
    /// when no file is present.
    pub fn load_or_default(working_dir: &Path) -> Result<Self> {
        let path = working_dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}
