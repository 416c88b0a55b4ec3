use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::rules::{RuleSet, Tier};

/// Settings file contents. Every field is optional.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Settings {
    pub(crate) default_patterns: Vec<String>,
    pub(crate) additional_patterns: Vec<String>,
    pub(crate) method_blacklist: Vec<String>,
    pub(crate) scan_root: PathBuf,
    pub(crate) platform_version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_patterns: Vec::new(),
            additional_patterns: Vec::new(),
            method_blacklist: Vec::new(),
            scan_root: PathBuf::from("mods"),
            platform_version: "unknown".to_string(),
        }
    }
}

impl Settings {
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings {}", path.display()))
    }

    /// Compile the three pattern lists; bad patterns are logged and dropped.
    pub(crate) fn rule_set(&self) -> RuleSet {
        let mut rules = RuleSet::new();
        let mut rejected = rules.add_patterns(Tier::Default, &self.default_patterns).len();
        rejected += rules
            .add_patterns(Tier::Additional, &self.additional_patterns)
            .len();
        rejected += rules.add_blacklist(&self.method_blacklist).len();
        if rejected > 0 {
            log::warn!("{rejected} rule pattern(s) were rejected");
        }
        rules
    }
}
