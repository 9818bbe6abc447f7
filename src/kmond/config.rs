use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result, bail};
use ini::{Ini, ParseOption};
use kmon_core::{
    config::{KstreamConfig, OutputFormat, ScannerConfig, SectionConfig},
    fs::DriveMapper,
};

const DEFAULT_CONFIG_FILE: &str = "/etc/kmon/kmon.ini";

const KSTREAM_SECTION: &str = "kstream";
const YARA_SECTION: &str = "yara";
const DEVICES_SECTION: &str = "devices";
const OUTPUT_SECTION: &str = "output";
const KCAP_SECTION: &str = "kcap";

/// kmon configuration, one [`SectionConfig`] for every `INI` section.
///
/// Read once at startup.
#[derive(Debug, Clone, Default)]
pub struct KmonConfig {
    sections: HashMap<String, SectionConfig>,
}

impl KmonConfig {
    /// Loads the default file. A missing default file means default settings.
    pub fn new() -> Result<Self> {
        let config_file = Path::new(DEFAULT_CONFIG_FILE);
        if !config_file.exists() {
            log::debug!("{DEFAULT_CONFIG_FILE} not found, using the default configuration");
            return Ok(Self::default());
        }
        Self::from_config_file(config_file)
    }

    /// Loads a custom file, which must exist.
    pub fn with_custom_file(config_file: &Path) -> Result<Self> {
        if !config_file.exists() {
            bail!("Configuration file {} not found", config_file.display());
        }
        Self::from_config_file(config_file)
    }

    fn from_config_file(config_file: &Path) -> Result<Self> {
        let conf = Ini::load_from_file_opt(config_file, parse_option())
            .with_context(|| format!("Error loading configuration from {config_file:?}"))?;
        Ok(Self::from_ini(&conf))
    }

    fn from_ini(conf: &Ini) -> Self {
        let mut sections: HashMap<String, SectionConfig> = HashMap::new();
        for (section, prop) in conf {
            if let Some(section) = section {
                let section_config = sections.entry(section.to_string()).or_default();
                for (key, value) in prop.iter() {
                    log::debug!("{}.{}={}", section, key, value);
                    section_config.insert(key.to_string(), value.to_string());
                }
            }
        }
        Self { sections }
    }

    /// Returns the section, empty if it isn't in the file.
    pub fn section(&self, name: &str) -> SectionConfig {
        self.sections.get(name).cloned().unwrap_or_default()
    }

    pub fn kstream(&self) -> Result<KstreamConfig> {
        KstreamConfig::try_from(&self.section(KSTREAM_SECTION))
            .with_context(|| format!("Invalid [{KSTREAM_SECTION}] section"))
    }

    pub fn scanner(&self) -> Result<ScannerConfig> {
        ScannerConfig::try_from(&self.section(YARA_SECTION))
            .with_context(|| format!("Invalid [{YARA_SECTION}] section"))
    }

    pub fn devices(&self) -> DriveMapper {
        let mapper = DriveMapper::from(&self.section(DEVICES_SECTION));
        if mapper.is_empty() {
            log::warn!("no [{DEVICES_SECTION}] mappings, kernel device paths are kept as they are");
        }
        mapper
    }

    pub fn output_format(&self) -> Result<OutputFormat> {
        self.section(OUTPUT_SECTION)
            .with_default("format", OutputFormat::default())
            .with_context(|| format!("Invalid [{OUTPUT_SECTION}] section"))
    }

    /// Capture file, if capture mode is configured.
    pub fn kcap_file(&self) -> Result<Option<PathBuf>> {
        self.section(KCAP_SECTION)
            .optional("file")
            .with_context(|| format!("Invalid [{KCAP_SECTION}] section"))
    }
}

impl FromStr for KmonConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let conf =
            Ini::load_from_str_opt(s, parse_option()).context("Error parsing configuration")?;
        Ok(Self::from_ini(&conf))
    }
}

// device paths are full of backslashes
fn parse_option() -> ParseOption {
    ParseOption {
        enabled_escape: false,
        ..Default::default()
    }
}
