//! Sensor catalog: the global whitelist of sensor names.
//!
//! Loaded once from the system config YAML (`version`, `valid_sensors`) and
//! consulted by the [`crate::dsl::loader::DslLoader`] to reject any
//! condition, comparison, or `set_value` key that is not a recognized
//! sensor. The namespace is flat: there is no hierarchy or wildcarding.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{PulsarError, PulsarResult};

/// `version = 1` is the only value this crate understands; unknown fields in
/// the document are ignored.
const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSystemConfig {
    version: u32,
    valid_sensors: Vec<String>,
}

/// Global whitelist of sensor names, flat namespace, loaded from the system
/// config file.
#[derive(Debug, Clone, Default)]
pub struct SensorCatalog {
    sensors: HashSet<String>,
}

impl SensorCatalog {
    /// Build a catalog directly from a set of names (useful for tests and
    /// for callers that already have the whitelist in memory).
    pub fn new(sensors: impl IntoIterator<Item = String>) -> Self {
        SensorCatalog { sensors: sensors.into_iter().collect() }
    }

    /// Parse the system config YAML document.
    pub fn from_yaml(text: &str) -> PulsarResult<Self> {
        let raw: RawSystemConfig = serde_yaml::from_str(text).map_err(|e| PulsarError::Parse {
            message: format!("invalid system config: {e}"),
            location: None,
        })?;

        if raw.version != SUPPORTED_VERSION {
            return Err(PulsarError::Parse {
                message: format!(
                    "unsupported system config version {} (only {SUPPORTED_VERSION} is recognized)",
                    raw.version
                ),
                location: None,
            });
        }

        Ok(SensorCatalog { sensors: raw.valid_sensors.into_iter().collect() })
    }

    /// Load and parse the system config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> PulsarResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PulsarError::io(path, e))?;
        Self::from_yaml(&text)
    }

    /// Whether `name` is a recognized sensor.
    pub fn contains(&self, name: &str) -> bool {
        self.sensors.contains(name)
    }

    /// All recognized sensor names, order unspecified.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sensors.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_version_one() {
        let yaml = "version: 1\nvalid_sensors: [temperature, humidity]\n";
        let catalog = SensorCatalog::from_yaml(yaml).unwrap();
        assert!(catalog.contains("temperature"));
        assert!(catalog.contains("humidity"));
        assert!(!catalog.contains("pressure"));
    }

    #[test]
    fn rejects_unknown_version() {
        let yaml = "version: 2\nvalid_sensors: []\n";
        assert!(SensorCatalog::from_yaml(yaml).is_err());
    }

    #[test]
    fn ignores_unknown_fields() {
        let yaml = "version: 1\nvalid_sensors: [a]\nextra_field: true\n";
        let catalog = SensorCatalog::from_yaml(yaml).unwrap();
        assert!(catalog.contains("a"));
    }
}
