use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Contents of the JSON config file.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub port: u16,
    /// Hosts whose `https://` links are downgraded to `http://` in served HTML.
    pub ssl_rewrite: Vec<String>,
    pub modifications: Vec<Modification>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Zero disables the bound.
    pub upstream_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            ssl_rewrite: Vec::new(),
            modifications: Vec::new(),
            cert_file: None,
            key_file: None,
            upstream_timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Certificate and key paths, only when both are configured.
    pub fn tls_files(&self) -> Option<(&Path, &Path)> {
        match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        (self.upstream_timeout_secs > 0).then(|| Duration::from_secs(self.upstream_timeout_secs))
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// One rewrite rule as written in the config file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Modification {
    pub url_match: String,
    pub selector: String,
    pub index: usize,
    pub attribute: String,
    pub wrapper: String,
    pub append_to: String,
    pub replace: String,
    pub trim: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModificationMode {
    Append,
    Replace,
}

impl Modification {
    /// Destination mode and selector. `appendTo` wins when both are set.
    pub fn target(&self) -> Option<(ModificationMode, &str)> {
        if !self.append_to.is_empty() {
            Some((ModificationMode::Append, self.append_to.as_str()))
        } else if !self.replace.is_empty() {
            Some((ModificationMode::Replace, self.replace.as_str()))
        } else {
            None
        }
    }
}

/// A modification with its `urlMatch` compiled.
#[derive(Clone, Debug)]
pub struct Rule {
    pub modification: Modification,
    url_match: Option<Regex>,
}

impl Rule {
    pub fn new(modification: Modification) -> Self {
        let url_match = match Regex::new(&modification.url_match) {
            Ok(regex) => Some(regex),
            Err(err) => {
                warn!(
                    %err,
                    pattern = %modification.url_match,
                    "invalid urlMatch; rule will apply to every url"
                );
                None
            }
        };
        Self {
            modification,
            url_match,
        }
    }

    /// A malformed pattern never blocks the rule.
    pub fn matches_url(&self, url: &str) -> bool {
        self.url_match
            .as_ref()
            .map(|regex| regex.is_match(url))
            .unwrap_or(true)
    }
}

/// Read-only rule state shared by every request.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    ssl_rewrite: Vec<String>,
}

impl RuleSet {
    pub fn new(modifications: Vec<Modification>, ssl_rewrite: Vec<String>) -> Self {
        Self {
            rules: modifications.into_iter().map(Rule::new).collect(),
            ssl_rewrite,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.modifications.clone(), config.ssl_rewrite.clone())
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn ssl_rewrite(&self) -> &[String] {
        &self.ssl_rewrite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{"modifications": []}"#).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.ssl_rewrite.is_empty());
        assert!(config.tls_files().is_none());
        assert_eq!(
            config.upstream_timeout(),
            Some(Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS))
        );
    }

    #[test]
    fn parses_rules_in_order() {
        let config: Config = serde_json::from_str(
            r##"{
                "port": 9000,
                "sslRewrite": ["example.com"],
                "modifications": [
                    {"urlMatch": "^/a", "selector": ".price", "index": 1, "trim": true, "appendTo": "#out"},
                    {"selector": "img", "attribute": "src", "wrapper": "<b>%s</b>", "replace": "#logo"}
                ]
            }"##,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.ssl_rewrite, vec!["example.com".to_string()]);
        assert_eq!(config.modifications.len(), 2);
        assert_eq!(config.modifications[0].index, 1);
        assert!(config.modifications[0].trim);
        assert_eq!(config.modifications[1].attribute, "src");
        assert_eq!(
            config.modifications[1].target(),
            Some((ModificationMode::Replace, "#logo"))
        );
    }

    #[test]
    fn append_takes_precedence_over_replace() {
        let modification = Modification {
            append_to: "#a".into(),
            replace: "#b".into(),
            ..Default::default()
        };
        assert_eq!(
            modification.target(),
            Some((ModificationMode::Append, "#a"))
        );
        assert_eq!(Modification::default().target(), None);
    }

    #[test]
    fn tls_requires_both_files() {
        let config = Config {
            cert_file: Some(PathBuf::from("cert.pem")),
            ..Default::default()
        };
        assert!(config.tls_files().is_none());
    }

    #[test]
    fn zero_timeout_disables_bound() {
        let config = Config {
            upstream_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.upstream_timeout().is_none());
    }

    #[test]
    fn invalid_url_match_does_not_block() {
        let rule = Rule::new(Modification {
            url_match: "([".into(),
            ..Default::default()
        });
        assert!(rule.matches_url("http://anything/"));
    }

    #[test]
    fn url_match_filters_urls() {
        let rule = Rule::new(Modification {
            url_match: "^/foo".into(),
            ..Default::default()
        });
        assert!(rule.matches_url("/foo/x"));
        assert!(!rule.matches_url("/bar"));
    }

    #[test]
    fn load_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 8181, "modifications": []}}"#).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.port, 8181);
    }

    #[test]
    fn load_config_fails_on_missing_or_malformed_file() {
        let missing = load_config(Path::new("/nonexistent/rewrite-proxy.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let malformed = load_config(file.path()).unwrap_err();
        assert!(matches!(malformed, ConfigError::Parse { .. }));
    }
}
