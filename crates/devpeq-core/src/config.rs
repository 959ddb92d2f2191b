//! Device profile configuration and adapter resolution
//!
//! Profiles are stored as YAML. Default location: ~/.config/devpeq/devices.yaml
//!
//! ```yaml
//! devices:
//!   - name: Moondrop Rays
//!     vendor: moondrop
//!     product_match: "rays"
//!     model:
//!       max_filters: 9
//!   - name: Qudelix 5K
//!     vendor: qudelix
//!     vendor_id: 0x0A12
//!     product_id: 0x4025
//!     model:
//!       max_filters: 10
//!       disconnect_on_save: false
//! ```

use crate::types::ModelConfig;
use crate::vendors::Vendor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root device configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeqConfig {
    /// User device profiles, consulted before the built-in ones
    pub devices: Vec<DeviceProfile>,
}

/// How to recognise one device model and which adapter drives it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Human-readable device name
    pub name: String,

    /// Adapter family
    pub vendor: Vendor,

    /// USB product name substring to match (case-insensitive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_match: Option<String>,

    /// USB vendor id for exact matching (takes priority over `product_match`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u16>,

    /// USB product id for exact matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,

    /// Capabilities handed to the adapter
    #[serde(default)]
    pub model: ModelConfig,
}

impl DeviceProfile {
    fn builtin(vendor: Vendor) -> Self {
        Self {
            name: vendor.label().to_string(),
            vendor,
            product_match: Some(vendor.label().to_string()),
            vendor_id: None,
            product_id: None,
            model: vendor.default_model(),
        }
    }

    fn matches_ids(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == Some(vendor_id) && self.product_id == Some(product_id)
    }

    fn matches_product(&self, product_lower: &str) -> bool {
        self.product_match
            .as_deref()
            .is_some_and(|pattern| !pattern.is_empty() && product_lower.contains(&pattern.to_lowercase()))
    }

    /// Model config with the profile name filled in when the file left it empty
    pub fn model_config(&self) -> ModelConfig {
        let mut model = self.model.clone();
        if model.name.is_empty() {
            model.name = self.name.clone();
        }
        model
    }
}

/// Ordered profile list used to pick an adapter for a discovered device
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    profiles: Vec<DeviceProfile>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl DeviceRegistry {
    /// Registry holding only the generic per-vendor profiles
    pub fn with_builtins() -> Self {
        Self {
            profiles: Vendor::ALL.into_iter().map(DeviceProfile::builtin).collect(),
        }
    }

    /// User profiles from `config` followed by the built-ins
    pub fn from_config(config: &PeqConfig) -> Self {
        let mut profiles = config.devices.clone();
        profiles.extend(Vendor::ALL.into_iter().map(DeviceProfile::builtin));
        Self { profiles }
    }

    pub fn profiles(&self) -> &[DeviceProfile] {
        &self.profiles
    }

    /// Find the profile for a device
    ///
    /// An exact VID/PID match anywhere in the list wins; otherwise the first
    /// profile whose `product_match` occurs in `product_name`.
    pub fn find(&self, vendor_id: u16, product_id: u16, product_name: &str) -> Option<&DeviceProfile> {
        let product_lower = product_name.to_lowercase();
        self.profiles
            .iter()
            .find(|p| p.matches_ids(vendor_id, product_id))
            .or_else(|| self.profiles.iter().find(|p| p.matches_product(&product_lower)))
    }

    /// Adapter family and capabilities for a device, if recognised
    pub fn resolve(&self, vendor_id: u16, product_id: u16, product_name: &str) -> Option<(Vendor, ModelConfig)> {
        let profile = self.find(vendor_id, product_id, product_name)?;
        log::debug!(
            "Resolved {:04x}:{:04x} '{}' to profile '{}' ({})",
            vendor_id,
            product_id,
            product_name,
            profile.name,
            profile.vendor
        );
        Some((profile.vendor, profile.model_config()))
    }
}

/// Get the default config file path
///
/// Returns: `~/.config/devpeq/devices.yaml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("devpeq")
        .join("devices.yaml")
}

/// Load device profiles from a YAML file
///
/// If the file doesn't exist, returns an empty config.
/// If the file exists but is invalid, logs a warning and returns an empty config.
pub fn load_config(path: &Path) -> PeqConfig {
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using built-in profiles");
        return PeqConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<PeqConfig>(&contents) {
            Ok(config) => {
                log::info!("load_config: Loaded {} device profile(s)", config.devices.len());
                for device in &config.devices {
                    log::info!(
                        "  - {} ({}, {} bands)",
                        device.name,
                        device.vendor,
                        device.model.max_filters
                    );
                }
                config
            }
            Err(e) => {
                log::warn!("load_config: Failed to parse config: {}, using built-in profiles", e);
                PeqConfig::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: Failed to read config file: {}, using built-in profiles", e);
            PeqConfig::default()
        }
    }
}

/// Save device profiles to a YAML file
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &PeqConfig, path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize device config to YAML")?;

    std::fs::write(path, yaml).with_context(|| format!("Failed to write device config file: {:?}", path))?;

    log::info!("save_config: Config saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
devices:
  - name: Rays
    vendor: moondrop
    product_match: "RAYS"
    model:
      max_filters: 8
  - name: 5K
    vendor: qudelix
    vendor_id: 2578
    product_id: 16421
    model:
      name: Qudelix-5K
      disconnect_on_save: true
"#;

    #[test]
    fn test_parse_sample() {
        let config: PeqConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].vendor, Vendor::Moondrop);
        assert_eq!(config.devices[0].model.max_filters, 8);
        assert_eq!(config.devices[1].vendor_id, Some(2578));
        assert_eq!(config.devices[1].model.max_filters, 10);
        assert!(config.devices[1].model.disconnect_on_save);
    }

    #[test]
    fn test_builtins_match_product_name() {
        let registry = DeviceRegistry::with_builtins();
        let (vendor, model) = registry.resolve(0x1234, 0x5678, "MOONDROP Quark2").unwrap();
        assert_eq!(vendor, Vendor::Moondrop);
        assert_eq!(model.max_filters, 9);

        let (vendor, _) = registry.resolve(0, 0, "Qudelix-5K USB DAC").unwrap();
        assert_eq!(vendor, Vendor::Qudelix);
        assert!(registry.resolve(0, 0, "Generic Keyboard").is_none());
    }

    #[test]
    fn test_user_profiles_come_first() {
        let config: PeqConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let registry = DeviceRegistry::from_config(&config);
        assert_eq!(registry.profiles().len(), 5);

        // Substring match in the user profile beats the built-in "moondrop" one
        let (vendor, model) = registry.resolve(0, 0, "Moondrop Rays").unwrap();
        assert_eq!(vendor, Vendor::Moondrop);
        assert_eq!(model.max_filters, 8);
        assert_eq!(model.name, "Rays");
    }

    #[test]
    fn test_id_match_wins_over_product_name() {
        let config: PeqConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let registry = DeviceRegistry::from_config(&config);
        // Product name says Moondrop, but the ids belong to the 5K profile
        let (vendor, model) = registry.resolve(2578, 16421, "Moondrop Rays").unwrap();
        assert_eq!(vendor, Vendor::Qudelix);
        assert_eq!(model.name, "Qudelix-5K");
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config = load_config(Path::new("/nonexistent/path/devices.yaml"));
        assert_eq!(config, PeqConfig::default());
    }

    #[test]
    fn test_load_invalid_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.yaml");
        std::fs::write(&path, "devices: [ { vendor: sony } ]").unwrap();
        assert_eq!(load_config(&path), PeqConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("devices.yaml");
        let config: PeqConfig = serde_yaml::from_str(SAMPLE).unwrap();

        save_config(&config, &path).unwrap();
        assert_eq!(load_config(&path), config);
    }

    #[test]
    fn test_default_path() {
        assert!(default_config_path().ends_with("devpeq/devices.yaml"));
    }
}
