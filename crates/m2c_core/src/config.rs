use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::runtime::embedded_default_config;
use crate::space::{SpaceRule, SpaceRules};

pub const DEFAULT_USER_AGENT: &str = "m2c/0.2";
pub const DEFAULT_ARTICLE_PATH: &str = "/$1";
pub const DEFAULT_SOURCE_URL: &str = "https://mediawiki.mapaction.org";
pub const DEFAULT_DESTINATION_URL: &str = "https://wiki-test.mapaction.org";
pub const DEFAULT_NOTICE_TITLE: &str = "Migrated from MediaWiki";
pub const DEFAULT_NOTICE_TEXT: &str = "This page was migrated automatically. The original page is";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationConfig {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub destination: DestinationSection,
    #[serde(default)]
    pub notice: NoticeSection,
    #[serde(default)]
    pub spaces: Vec<SpaceRule>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SourceSection {
    pub url: Option<String>,
    pub api_url: Option<String>,
    pub article_path: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DestinationSection {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct NoticeSection {
    pub title: Option<String>,
    pub text: Option<String>,
}

impl MigrationConfig {
    /// Resolve the source wiki base URL: env M2C_SOURCE_URL > config > default.
    pub fn source_url(&self) -> String {
        env_override("M2C_SOURCE_URL")
            .or_else(|| self.source.url.clone())
            .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Resolve the source API URL: env M2C_SOURCE_API_URL > config > `<source_url>/api.php`.
    pub fn api_url(&self) -> String {
        env_override("M2C_SOURCE_API_URL")
            .or_else(|| self.source.api_url.clone())
            .unwrap_or_else(|| format!("{}/api.php", self.source_url()))
    }

    pub fn article_path(&self) -> &str {
        self.source
            .article_path
            .as_deref()
            .unwrap_or(DEFAULT_ARTICLE_PATH)
    }

    pub fn user_agent(&self) -> String {
        self.source
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve the destination base URL: env M2C_DESTINATION_URL > config > default.
    pub fn destination_url(&self) -> String {
        env_override("M2C_DESTINATION_URL")
            .or_else(|| self.destination.url.clone())
            .unwrap_or_else(|| DEFAULT_DESTINATION_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn notice_title(&self) -> &str {
        self.notice.title.as_deref().unwrap_or(DEFAULT_NOTICE_TITLE)
    }

    pub fn notice_text(&self) -> &str {
        self.notice.text.as_deref().unwrap_or(DEFAULT_NOTICE_TEXT)
    }

    /// Public URL of a page on the source wiki, built from the article path.
    pub fn source_page_url(&self, title: &str) -> String {
        let encoded = title.trim().replace(' ', "_");
        format!(
            "{}{}",
            self.source_url(),
            self.article_path().replace("$1", &encoded)
        )
    }

    pub fn space_rules(&self) -> SpaceRules {
        SpaceRules::new(self.spaces.clone())
    }
}

/// Load the configuration file; a missing file yields the embedded defaults and
/// a file without `[[spaces]]` inherits the embedded space table.
pub fn load_config(config_path: &Path) -> Result<MigrationConfig> {
    let defaults = default_config()?;
    if !config_path.exists() {
        return Ok(defaults);
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let mut parsed: MigrationConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    if parsed.spaces.is_empty() {
        parsed.spaces = defaults.spaces;
    }
    validate_spaces(&parsed.spaces)
        .with_context(|| format!("invalid space table in {}", config_path.display()))?;
    Ok(parsed)
}

pub fn default_config() -> Result<MigrationConfig> {
    toml::from_str(embedded_default_config()).context("failed to parse embedded default config")
}

fn validate_spaces(spaces: &[SpaceRule]) -> Result<()> {
    for rule in spaces {
        if rule.key.trim().is_empty() {
            bail!("space key cannot be empty");
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationCredentials {
    pub command_path: String,
    pub username: String,
    pub password: String,
}

impl SourceCredentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            username: required(&lookup, "MEDIAWIKI_USERNAME")?,
            password: required(&lookup, "MEDIAWIKI_PASSWORD")?,
        })
    }
}

impl DestinationCredentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            command_path: required(&lookup, "CONFLUENCE_COMMAND_PATH")?,
            username: required(&lookup, "HTTP_BASIC_AUTH_USERNAME")?,
            password: required(&lookup, "HTTP_BASIC_AUTH_PASSWORD")?,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => bail!("unable to retrieve required environment variable {key}"),
    }
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn embedded_defaults_carry_ordered_space_table() {
        let config = default_config().expect("default config");
        let keys = config
            .spaces
            .iter()
            .map(|rule| rule.key.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec!["general-guidance", "standard-procedures", "internal-training"]
        );
        assert!(config.spaces[0].labels.is_empty());
        assert_eq!(config.spaces[1].labels.len(), 18);
        assert_eq!(config.spaces[2].labels.len(), 10);
    }

    #[test]
    fn load_config_returns_defaults_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/m2c.toml")).expect("load config");
        assert_eq!(config.spaces.len(), 3);
        assert_eq!(config.article_path(), "/$1");
    }

    #[test]
    fn load_config_inherits_space_table_when_omitted() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            "[source]\nurl = \"https://wiki.example.org/\"\narticle_path = \"/wiki/$1\"\n",
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.spaces.len(), 3);
        assert_eq!(config.source.url.as_deref(), Some("https://wiki.example.org/"));
        assert_eq!(config.article_path(), "/wiki/$1");
    }

    #[test]
    fn load_config_parses_custom_space_rules() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[[spaces]]
key = "field-ops"
labels = ["Deployments"]
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.spaces.len(), 1);
        assert_eq!(config.spaces[0].key, "field-ops");
        assert_eq!(config.spaces[0].labels, vec!["Deployments".to_string()]);
    }

    #[test]
    fn load_config_rejects_empty_space_key() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[[spaces]]\nkey = \" \"\nlabels = []\n").expect("write");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(format!("{error:#}").contains("space key cannot be empty"));
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[source\nurl = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn source_page_url_uses_article_path() {
        let config = MigrationConfig {
            source: SourceSection {
                url: Some("https://wiki.example.org".to_string()),
                article_path: Some("/wiki/$1".to_string()),
                ..SourceSection::default()
            },
            ..MigrationConfig::default()
        };
        assert_eq!(
            config.source_page_url("Team Training"),
            "https://wiki.example.org/wiki/Team_Training"
        );
    }

    #[test]
    fn credentials_require_every_variable() {
        let env = HashMap::from([
            ("CONFLUENCE_COMMAND_PATH".to_string(), "/opt/acli".to_string()),
            ("HTTP_BASIC_AUTH_USERNAME".to_string(), "migrator".to_string()),
        ]);
        let error = DestinationCredentials::from_lookup(|key| env.get(key).cloned())
            .expect_err("missing password must fail");
        assert!(error.to_string().contains("HTTP_BASIC_AUTH_PASSWORD"));

        let env = HashMap::from([
            ("MEDIAWIKI_USERNAME".to_string(), " bot ".to_string()),
            ("MEDIAWIKI_PASSWORD".to_string(), "secret".to_string()),
        ]);
        let credentials =
            SourceCredentials::from_lookup(|key| env.get(key).cloned()).expect("credentials");
        assert_eq!(credentials.username, "bot");
    }
}
