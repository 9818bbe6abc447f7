//! Scan engine contract and a pattern based implementation.
//!
//! Rules are loaded from `*.yaml` files found under the rules directory:
//!
//! ```yaml
//! - name: mimikatz
//!   tags: [credential-access]
//!   strings: ["sekurlsa::logonpasswords", "gentilkiwi"]
//!   condition: any
//! ```

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use glob::glob;
use memchr::memmem;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ScannerConfig;

const RULE_EXTENSION: &str = "yaml";

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Error listing rules: {0}")]
    RuleListing(#[from] glob::PatternError),
    #[error("Error reading rule: {name}")]
    RuleLoading {
        name: String,
        #[source]
        error: std::io::Error,
    },
    #[error("Error parsing rule file: {filename}")]
    RuleParsing {
        filename: String,
        #[source]
        error: serde_yaml::Error,
    },
    #[error("rule {0} has no strings")]
    EmptyRule(String),
    #[error("no rules found in {0}")]
    NoRules(PathBuf),
    #[error("scanner is disabled")]
    Disabled,
    #[error("Error reading {path}")]
    Target {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

/// Rule that matched the scanned target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMatch {
    pub rule: String,
    pub tags: Vec<String>,
}

/// Contract of the scan engine.
pub trait Scanner: Send + Sync {
    /// Scans the file. Scanning must be bounded in time and memory.
    fn scan_file(&self, path: &Path) -> Result<Vec<ScanMatch>, ScanError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    #[default]
    Any,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRule {
    name: String,
    #[serde(default)]
    tags: Vec<String>,
    strings: Vec<String>,
    #[serde(default)]
    condition: Condition,
}

impl UserRule {
    fn matches(&self, data: &[u8]) -> bool {
        let mut found = self
            .strings
            .iter()
            .map(|s| contains(data, s.as_bytes()));
        match self.condition {
            Condition::Any => found.any(|f| f),
            Condition::All => found.all(|f| f),
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && memmem::find(haystack, needle).is_some()
}

/// [`Scanner`] matching literal strings against the file contents.
#[derive(Debug)]
pub struct PatternScanner {
    rules: Vec<UserRule>,
    max_file_size: u64,
}

impl PatternScanner {
    pub fn new(config: &ScannerConfig) -> Result<Self, ScanError> {
        let rules_path = match (&config.rules, config.enabled) {
            (Some(rules_path), true) => rules_path,
            _ => return Err(ScanError::Disabled),
        };
        let rules = load_user_rules_from_dir(rules_path)?;
        if rules.is_empty() {
            return Err(ScanError::NoRules(rules_path.clone()));
        }
        Self::from_rules(rules, config.max_file_size)
    }

    pub fn from_rules(rules: Vec<UserRule>, max_file_size: u64) -> Result<Self, ScanError> {
        if let Some(rule) = rules.iter().find(|rule| rule.strings.is_empty()) {
            return Err(ScanError::EmptyRule(rule.name.clone()));
        }
        log::info!("Loaded {} scan rules", rules.len());
        Ok(Self {
            rules,
            max_file_size,
        })
    }

    pub fn scan(&self, data: &[u8]) -> Vec<ScanMatch> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(data))
            .map(|rule| ScanMatch {
                rule: rule.name.clone(),
                tags: rule.tags.clone(),
            })
            .collect()
    }
}

impl Scanner for PatternScanner {
    fn scan_file(&self, path: &Path) -> Result<Vec<ScanMatch>, ScanError> {
        let target = |error| ScanError::Target {
            path: path.to_path_buf(),
            error,
        };
        let file = fs::File::open(path).map_err(target)?;
        let mut data = Vec::new();
        // only the head of big files is scanned
        file.take(self.max_file_size)
            .read_to_end(&mut data)
            .map_err(target)?;
        Ok(self.scan(&data))
    }
}

fn load_user_rules_from_dir(rules_path: &Path) -> Result<Vec<UserRule>, ScanError> {
    let expr = format!("{}/**/*.{}", rules_path.display(), RULE_EXTENSION);
    let mut rules = Vec::new();
    for path in glob(&expr)?.flatten() {
        log::debug!("loading rule {}", path.display());
        let body = fs::read_to_string(&path).map_err(|error| ScanError::RuleLoading {
            name: path.display().to_string(),
            error,
        })?;
        let file_rules =
            serde_yaml::from_str::<Vec<UserRule>>(&body).map_err(|error| ScanError::RuleParsing {
                filename: path.display().to_string(),
                error,
            })?;
        rules.extend(file_rules);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const RULES: &str = r#"
- name: mimikatz
  tags: [credential-access]
  strings: ["sekurlsa::logonpasswords", "gentilkiwi"]
- name: dropper
  strings: ["MZ", "URLDownloadToFile"]
  condition: all
"#;

    fn config(dir: &Path) -> ScannerConfig {
        ScannerConfig {
            enabled: true,
            rules: Some(dir.to_path_buf()),
            max_file_size: 1024,
        }
    }

    #[test]
    fn load_and_scan() {
        let rules = tempfile::tempdir().unwrap();
        fs::write(rules.path().join("default.yaml"), RULES).unwrap();
        let scanner = PatternScanner::new(&config(rules.path())).unwrap();

        let mut target = tempfile::NamedTempFile::new().unwrap();
        target
            .write_all(b"MZ....gentilkiwi....URLDownloadToFile")
            .unwrap();
        let matches = scanner.scan_file(target.path()).unwrap();
        assert_eq!(
            matches,
            vec![
                ScanMatch {
                    rule: "mimikatz".to_string(),
                    tags: vec!["credential-access".to_string()],
                },
                ScanMatch {
                    rule: "dropper".to_string(),
                    tags: vec![],
                },
            ]
        );
        assert!(scanner.scan(b"MZ only").is_empty());
    }

    #[test]
    fn bounded_read() {
        let rules = tempfile::tempdir().unwrap();
        fs::write(rules.path().join("default.yaml"), RULES).unwrap();
        let mut config = config(rules.path());
        config.max_file_size = 8;
        let scanner = PatternScanner::new(&config).unwrap();

        let mut target = tempfile::NamedTempFile::new().unwrap();
        target.write_all(b"........gentilkiwi").unwrap();
        assert!(scanner.scan_file(target.path()).unwrap().is_empty());
    }

    #[test]
    fn large_buffers() {
        let rules: Vec<UserRule> = serde_yaml::from_str(RULES).unwrap();
        let scanner = PatternScanner::from_rules(rules, 64 << 20).unwrap();

        // near misses of the needle all over the buffer
        let mut data = b"sekurlsa::logonpassword ".repeat(1 << 18);
        assert!(scanner.scan(&data).is_empty());

        data.extend_from_slice(b"sekurlsa::logonpasswords");
        let matches = scanner.scan(&data);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].rule, "mimikatz");
    }

    #[test]
    fn init_failures() {
        let rules = tempfile::tempdir().unwrap();
        assert!(matches!(
            PatternScanner::new(&config(rules.path())),
            Err(ScanError::NoRules(_))
        ));
        assert!(matches!(
            PatternScanner::new(&ScannerConfig::default()),
            Err(ScanError::Disabled)
        ));

        fs::write(rules.path().join("broken.yaml"), "- name: [").unwrap();
        assert!(matches!(
            PatternScanner::new(&config(rules.path())),
            Err(ScanError::RuleParsing { .. })
        ));
    }

    #[test]
    fn missing_target() {
        let scanner = PatternScanner::from_rules(Vec::new(), 1024).unwrap();
        assert!(matches!(
            scanner.scan_file(Path::new("/nonexistent/kmon/target.exe")),
            Err(ScanError::Target { .. })
        ));
    }
}
