use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "patrolbot/0.1 (page curation assistant)";
pub const DEFAULT_FORUM_ROOT: &str = "Redirects for discussion";
pub const DEFAULT_LOG_TITLE: &str = "Patrolbot/logs/skippedRfDs.json";
pub const DEFAULT_MAX_LOG_AGE_DAYS: i64 = 7;

/// Bot configuration, read from a TOML file. Every field is optional;
/// environment variables override the file where noted.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub patrol: PatrolSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PatrolSection {
    /// Base forum page under the project namespace.
    pub forum_root: Option<String>,
    /// Log store page under the bot's user space.
    pub log_title: Option<String>,
    pub include_redirects: Option<bool>,
    pub include_nominated: Option<bool>,
    pub include_others: Option<bool>,
    pub max_log_age_days: Option<i64>,
}

impl BotConfig {
    /// API endpoint. `WIKI_API_URL` overrides the config file.
    pub fn api_url(&self) -> Option<String> {
        if let Ok(url) = env::var("WIKI_API_URL")
            && !url.trim().is_empty()
        {
            return Some(url.trim().to_string());
        }
        self.wiki.api_url.clone()
    }

    /// User agent sent with every request. `WIKI_USER_AGENT` overrides.
    pub fn user_agent(&self) -> String {
        if let Ok(agent) = env::var("WIKI_USER_AGENT")
            && !agent.trim().is_empty()
        {
            return agent.trim().to_string();
        }
        self.wiki
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn forum_root(&self) -> String {
        self.patrol
            .forum_root
            .clone()
            .unwrap_or_else(|| DEFAULT_FORUM_ROOT.to_string())
    }

    pub fn log_title(&self) -> String {
        self.patrol
            .log_title
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_TITLE.to_string())
    }

    pub fn max_log_age_days(&self) -> i64 {
        self.patrol
            .max_log_age_days
            .unwrap_or(DEFAULT_MAX_LOG_AGE_DAYS)
    }
}

/// Load configuration from `config_path`. A missing file is not an error;
/// defaults cover everything except the API endpoint.
pub fn load_config(config_path: &Path) -> Result<BotConfig> {
    if !config_path.exists() {
        return Ok(BotConfig::default());
    }
    let text = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read config file {}", config_path.display()))?;
    let config: BotConfig = toml::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", config_path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{BotConfig, DEFAULT_FORUM_ROOT, DEFAULT_MAX_LOG_AGE_DAYS, load_config};

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = load_config(&dir.path().join("patrolbot.toml")).expect("load");
        assert_eq!(config, BotConfig::default());
        assert_eq!(config.forum_root(), DEFAULT_FORUM_ROOT);
        assert_eq!(config.max_log_age_days(), DEFAULT_MAX_LOG_AGE_DAYS);
    }

    #[test]
    fn file_values_are_picked_up() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("patrolbot.toml");
        fs::write(
            &path,
            concat!(
                "[wiki]\n",
                "api_url = \"https://wiki.test/w/api.php\"\n",
                "\n",
                "[patrol]\n",
                "forum_root = \"Pages for deletion\"\n",
                "max_log_age_days = 14\n",
            ),
        )
        .expect("write config");
        let config = load_config(&path).expect("load");
        assert_eq!(
            config.wiki.api_url.as_deref(),
            Some("https://wiki.test/w/api.php")
        );
        assert_eq!(config.forum_root(), "Pages for deletion");
        assert_eq!(config.max_log_age_days(), 14);
        assert_eq!(config.log_title(), "Patrolbot/logs/skippedRfDs.json");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("patrolbot.toml");
        fs::write(&path, "[wiki\napi_url = 3").expect("write config");
        assert!(load_config(&path).is_err());
    }
}
