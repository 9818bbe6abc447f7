//! Device name resolution.

use crate::config::SectionConfig;

/// Translates kernel device paths into drive letter paths.
pub trait DevMapper: Send + Sync {
    /// Returns the drive letter path, or the original path if no mapping applies.
    fn resolve(&self, path: &str) -> String;
}

/// [`DevMapper`] backed by a static table of `device prefix -> drive` mappings.
#[derive(Debug, Clone, Default)]
pub struct DriveMapper {
    // sorted by decreasing prefix length so the most specific device wins
    mappings: Vec<(String, String)>,
}

impl DriveMapper {
    pub fn new<I, D, L>(mappings: I) -> Self
    where
        I: IntoIterator<Item = (D, L)>,
        D: Into<String>,
        L: Into<String>,
    {
        let mut mappings: Vec<(String, String)> = mappings
            .into_iter()
            .map(|(device, drive)| {
                let device: String = device.into();
                let drive: String = drive.into();
                (
                    device.trim_end_matches('\\').to_lowercase(),
                    drive.trim_end_matches('\\').to_string(),
                )
            })
            .filter(|(device, _)| !device.is_empty())
            .collect();
        mappings.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { mappings }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl From<&SectionConfig> for DriveMapper {
    fn from(config: &SectionConfig) -> Self {
        DriveMapper::new(config.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

impl DevMapper for DriveMapper {
    fn resolve(&self, path: &str) -> String {
        for (device, drive) in &self.mappings {
            let Some(head) = path.get(..device.len()) else {
                continue;
            };
            if !head.eq_ignore_ascii_case(device) {
                continue;
            }
            let tail = &path[device.len()..];
            if tail.is_empty() || tail.starts_with('\\') {
                return format!("{drive}{tail}");
            }
        }
        path.to_string()
    }
}
