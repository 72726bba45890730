use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_COLLECTION_OWNER: &str = "PUBLISHING_SUPPORT";
pub const DEFAULT_COLLECTION_TYPE: &str = "manual";
pub const DEFAULT_CONTENT_EXTENSION: &str = "json";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ToolConfig {
    #[serde(default)]
    pub collections: CollectionsSection,
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default)]
    pub moves: MovesSection,
    #[serde(default)]
    pub jobs: JobsSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CollectionsSection {
    pub owner: Option<String>,
    #[serde(rename = "type")]
    pub collection_type: Option<String>,
}

/// Which files the move's reference scan reads.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ScanSection {
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub skip_dirs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MovesSection {
    pub blocked_policy: Option<BlockedPolicy>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct JobsSection {
    #[serde(default)]
    pub skip_dirs: Vec<String>,
    #[serde(default)]
    pub file_names: Vec<String>,
    pub limit: Option<usize>,
}

/// What a move does with a back-reference already staged by another collection.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlockedPolicy {
    /// Fail the whole move before anything is written.
    #[default]
    Abort,
    /// Leave the blocked page out and list it in the report.
    Skip,
}

impl BlockedPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
        }
    }
}

impl ToolConfig {
    /// Resolve collection owner: env ZEBEDEE_COLLECTION_OWNER > config > default.
    pub fn collection_owner(&self) -> String {
        self.collection_owner_with_lookup(|key| env::var(key).ok())
    }

    fn collection_owner_with_lookup<F>(&self, lookup_env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup_env("ZEBEDEE_COLLECTION_OWNER") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.collections
            .owner
            .clone()
            .unwrap_or_else(|| DEFAULT_COLLECTION_OWNER.to_string())
    }

    pub fn collection_type(&self) -> String {
        self.collections
            .collection_type
            .clone()
            .unwrap_or_else(|| DEFAULT_COLLECTION_TYPE.to_string())
    }

    pub fn blocked_policy(&self) -> BlockedPolicy {
        self.moves.blocked_policy.unwrap_or_default()
    }

    pub fn scan_extensions(&self) -> Vec<String> {
        if self.scan.extensions.is_empty() {
            vec![DEFAULT_CONTENT_EXTENSION.to_string()]
        } else {
            self.scan
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect()
        }
    }
}

/// Load and parse a ToolConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ToolConfig> {
    if !config_path.exists() {
        return Ok(ToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{BlockedPolicy, DEFAULT_COLLECTION_OWNER, ToolConfig, load_config};

    #[test]
    fn missing_config_file_yields_defaults() {
        let temp = tempdir().expect("tempdir");
        let config = load_config(&temp.path().join("absent.toml")).expect("load");
        assert_eq!(config, ToolConfig::default());
        assert_eq!(config.blocked_policy(), BlockedPolicy::Abort);
        assert_eq!(config.scan_extensions(), vec!["json".to_string()]);
        assert_eq!(config.collection_type(), "manual");
    }

    #[test]
    fn config_sections_parse_from_toml() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join(".zebedee-utils.toml");
        fs::write(
            &path,
            r#"
[collections]
owner = "DATA_VIS"
type = "scheduled"

[scan]
extensions = [".json", "html"]
skip_dirs = ["previous"]

[moves]
blocked_policy = "skip"

[jobs]
limit = 3300
"#,
        )
        .expect("write config");

        let config = load_config(&path).expect("load");
        assert_eq!(config.collection_type(), "scheduled");
        assert_eq!(config.blocked_policy(), BlockedPolicy::Skip);
        assert_eq!(
            config.scan_extensions(),
            vec!["json".to_string(), "html".to_string()]
        );
        assert_eq!(config.scan.skip_dirs, vec!["previous".to_string()]);
        assert_eq!(config.jobs.limit, Some(3300));
        assert_eq!(config.collection_owner_with_lookup(|_| None), "DATA_VIS");
    }

    #[test]
    fn owner_env_override_wins_over_config() {
        let config = ToolConfig::default();
        assert_eq!(
            config.collection_owner_with_lookup(|_| None),
            DEFAULT_COLLECTION_OWNER
        );

        let env = HashMap::from([(
            "ZEBEDEE_COLLECTION_OWNER".to_string(),
            " CONTENT_TEAM ".to_string(),
        )]);
        assert_eq!(
            config.collection_owner_with_lookup(|key| env.get(key).cloned()),
            "CONTENT_TEAM"
        );
    }

    #[test]
    fn blocked_policy_rejects_unknown_values() {
        let config: ToolConfig =
            toml::from_str("[moves]\nblocked_policy = \"skip\"\n").expect("parse");
        assert_eq!(config.blocked_policy(), BlockedPolicy::Skip);
        assert!(toml::from_str::<ToolConfig>("[moves]\nblocked_policy = \"retry\"\n").is_err());
    }
}
