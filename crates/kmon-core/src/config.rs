use std::{
    collections::{
        HashMap,
        hash_map::{IntoIter, Iter},
    },
    fmt::Display,
    path::PathBuf,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString};
use thiserror::Error;

/// Key/value settings of a single configuration section.
#[derive(Debug, Clone, Default)]
pub struct SectionConfig {
    inner: HashMap<String, String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("field {field} is required")]
    RequiredValue { field: String },
    #[error("{value} is not a valid value for field {field}: {err}")]
    InvalidValue {
        field: String,
        value: String,
        err: String,
    },
}

impl SectionConfig {
    /// Inserts a new configuration value.
    pub fn insert(&mut self, key: String, value: String) -> Option<String> {
        self.inner.insert(key, value)
    }

    /// Returns an option of raw configuration value.
    pub fn get_raw(&self, config_name: &str) -> Option<&str> {
        self.inner.get(config_name).map(String::as_str)
    }

    /// Returns a typed configuration value.
    pub fn required<T>(&self, config_name: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        match self.inner.get(config_name) {
            None => Err(ConfigError::RequiredValue {
                field: config_name.to_string(),
            }),
            Some(value) => parse(value, config_name),
        }
    }

    /// Returns an optional typed configuration value.
    pub fn optional<T>(&self, config_name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        self.inner
            .get(config_name)
            .map(|value| parse(value, config_name))
            .transpose()
    }

    /// Returns a typed configuration value, or `default` if the field is missing.
    pub fn with_default<T>(&self, config_name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        Ok(self.optional(config_name)?.unwrap_or(default))
    }

    /// Return a comma separed list of values. Return empty vector if field is missing.
    pub fn get_list<T>(&self, config_name: &str) -> Result<Vec<T>, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        self.inner
            .get(config_name)
            .iter()
            .flat_map(|config| config.split(','))
            .filter(|item| !item.is_empty())
            .map(|item| parse(item.trim(), config_name))
            .collect()
    }

    /// Return a comma separed list of values. Return default vector if field is missing.
    pub fn get_list_with_default<T>(
        &self,
        config_name: &str,
        default: Vec<T>,
    ) -> Result<Vec<T>, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        if self.inner.contains_key(config_name) {
            self.get_list(config_name)
        } else {
            Ok(default)
        }
    }

    pub fn iter(&self) -> Iter<'_, String, String> {
        self.inner.iter()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn into_iter(self) -> IntoIter<String, String> {
        self.inner.into_iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SectionConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        SectionConfig {
            inner: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

fn parse<T>(value: &str, config_name: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    T::from_str(value).map_err(|err| ConfigError::InvalidValue {
        field: config_name.to_string(),
        value: value.to_string(),
        err: err.to_string(),
    })
}

/// Kernel event categories enabled in the tracing session. Process and thread
/// events are always on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KstreamConfig {
    pub enable_fileio: bool,
    pub enable_registry: bool,
    pub enable_image: bool,
    pub enable_net: bool,
    pub enable_handle: bool,
}

impl Default for KstreamConfig {
    fn default() -> Self {
        Self {
            enable_fileio: true,
            enable_registry: true,
            enable_image: true,
            enable_net: true,
            enable_handle: false,
        }
    }
}

impl TryFrom<&SectionConfig> for KstreamConfig {
    type Error = ConfigError;

    fn try_from(config: &SectionConfig) -> Result<Self, Self::Error> {
        let defaults = KstreamConfig::default();
        Ok(KstreamConfig {
            enable_fileio: config.with_default("enable_fileio", defaults.enable_fileio)?,
            enable_registry: config.with_default("enable_registry", defaults.enable_registry)?,
            enable_image: config.with_default("enable_image", defaults.enable_image)?,
            enable_net: config.with_default("enable_net", defaults.enable_net)?,
            enable_handle: config.with_default("enable_handle", defaults.enable_handle)?,
        })
    }
}

pub const DEFAULT_MAX_FILE_SIZE: u64 = 32 * 1024 * 1024;

/// Settings of the scan engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    pub enabled: bool,
    pub rules: Option<PathBuf>,
    /// Files bigger than this are not scanned.
    pub max_file_size: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rules: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl TryFrom<&SectionConfig> for ScannerConfig {
    type Error = ConfigError;

    fn try_from(config: &SectionConfig) -> Result<Self, Self::Error> {
        let enabled = config.with_default("enabled", false)?;
        let rules = config.optional::<PathBuf>("rules")?;
        if enabled && rules.is_none() {
            return Err(ConfigError::RequiredValue {
                field: "rules".to_string(),
            });
        }
        Ok(ScannerConfig {
            enabled,
            rules,
            max_file_size: config.with_default("max_file_size", DEFAULT_MAX_FILE_SIZE)?,
        })
    }
}

/// Rendering of the events printed on the console.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, StrumDisplay, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let config: SectionConfig = [("size", "42"), ("list", "a, b,,c"), ("bad", "nope")]
            .into_iter()
            .collect();

        assert_eq!(config.required::<u32>("size"), Ok(42));
        assert_eq!(
            config.required::<u32>("missing"),
            Err(ConfigError::RequiredValue {
                field: "missing".to_string()
            })
        );
        assert_eq!(config.optional::<u32>("missing"), Ok(None));
        assert_eq!(config.with_default("missing", 7u32), Ok(7));
        assert!(matches!(
            config.with_default("bad", false),
            Err(ConfigError::InvalidValue { field, value, .. }) if field == "bad" && value == "nope"
        ));
        assert_eq!(
            config.get_list::<String>("list"),
            Ok(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert_eq!(
            config.get_list_with_default("missing", vec![1u8]),
            Ok(vec![1u8])
        );
    }

    #[test]
    fn kstream_defaults() {
        let config = KstreamConfig::try_from(&SectionConfig::default()).unwrap();
        assert_eq!(config, KstreamConfig::default());
        assert!(config.enable_fileio && config.enable_net);
        assert!(!config.enable_handle);
    }

    #[test]
    fn kstream_overrides() {
        let section: SectionConfig = [("enable_handle", "true"), ("enable_registry", "false")]
            .into_iter()
            .collect();
        let config = KstreamConfig::try_from(&section).unwrap();
        assert!(config.enable_handle);
        assert!(!config.enable_registry);
        assert!(config.enable_image);
    }

    #[test]
    fn scanner_requires_rules_when_enabled() {
        let section: SectionConfig = [("enabled", "true")].into_iter().collect();
        assert_eq!(
            ScannerConfig::try_from(&section),
            Err(ConfigError::RequiredValue {
                field: "rules".to_string()
            })
        );

        let section: SectionConfig = [("enabled", "true"), ("rules", "/etc/kmon/rules")]
            .into_iter()
            .collect();
        let config = ScannerConfig::try_from(&section).unwrap();
        assert_eq!(config.rules, Some(PathBuf::from("/etc/kmon/rules")));
        assert_eq!(config.max_file_size, DEFAULT_MAX_FILE_SIZE);
    }

    #[test]
    fn output_format() {
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::default().to_string(), "text");
    }
}
