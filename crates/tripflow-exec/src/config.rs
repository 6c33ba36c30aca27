use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

fn default_max_actions_per_turn() -> usize {
    8
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

/// Runner settings, loadable from YAML. Every field has a default so an empty
/// file is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_max_actions_per_turn")]
    pub max_actions_per_turn: usize,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_actions_per_turn: default_max_actions_per_turn(),
            locale: default_locale(),
            timezone: default_timezone(),
        }
    }
}

impl RunnerConfig {
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let raw = fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw)
            .map_err(|err| io::Error::other(format!("invalid runner config: {err}")))
    }
}
