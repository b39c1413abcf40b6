use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{DesignerError, DesignerResult};
use crate::ids::{safe_id, IdPolicy};

pub const DEFAULT_ASSET_ROOT: &str = "/config/esphome_touch_designer_assets";

/// Knobs for one compilation. Every field has a default, so an empty
/// config file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileOptions {
    /// Lifetime of an anti-feedback lock, in milliseconds
    pub lock_window_ms: u32,
    /// `delay:` emitted before an outbound call; 0 disables it
    pub outbound_delay_ms: u32,
    pub asset_root: String,
    /// Emit `wifi:`/`ota:` when the recipe has none
    pub default_network: bool,
    pub header_comment: bool,
    pub reserved_id: String,
    pub reserved_id_replacement: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            lock_window_ms: 500,
            outbound_delay_ms: 150,
            asset_root: DEFAULT_ASSET_ROOT.to_string(),
            default_network: true,
            header_comment: true,
            reserved_id: "main".to_string(),
            reserved_id_replacement: "main_page".to_string(),
        }
    }
}

impl CompileOptions {
    pub fn from_yaml_str(yaml: &str) -> DesignerResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let options: CompileOptions = serde_yaml::from_str(yaml)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_path(path: &Path) -> DesignerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DesignerError::io(path, e))?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> DesignerResult<()> {
        if self.lock_window_ms == 0 {
            return Err(DesignerError::InvalidConfig {
                key: "lock_window_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        for (key, value) in [
            ("reserved_id", &self.reserved_id),
            ("reserved_id_replacement", &self.reserved_id_replacement),
        ] {
            if value.is_empty() || safe_id(value) != *value {
                return Err(DesignerError::InvalidConfig {
                    key: key.to_string(),
                    reason: format!("'{}' is not a plain identifier", value),
                });
            }
        }
        if self.reserved_id == self.reserved_id_replacement {
            return Err(DesignerError::InvalidConfig {
                key: "reserved_id_replacement".to_string(),
                reason: "must differ from reserved_id".to_string(),
            });
        }
        Ok(())
    }

    pub fn id_policy(&self) -> IdPolicy {
        IdPolicy::new(&self.reserved_id, &self.reserved_id_replacement)
    }

    pub fn asset_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.asset_root.trim_end_matches('/'), file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(CompileOptions::from_yaml_str("").unwrap(), CompileOptions::default());
    }

    #[test]
    fn test_partial_override() {
        let opts = CompileOptions::from_yaml_str("lock_window_ms: 800\ndefault_network: false\n").unwrap();
        assert_eq!(opts.lock_window_ms, 800);
        assert!(!opts.default_network);
        assert_eq!(opts.outbound_delay_ms, 150);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            CompileOptions::from_yaml_str("lock_window_ms: 0"),
            Err(DesignerError::InvalidConfig { .. })
        ));
        assert!(matches!(
            CompileOptions::from_yaml_str("reserved_id_replacement: main"),
            Err(DesignerError::InvalidConfig { .. })
        ));
        assert!(matches!(
            CompileOptions::from_yaml_str("unknown_key: 1"),
            Err(DesignerError::YamlError(_))
        ));
    }

    #[test]
    fn test_asset_path() {
        let opts = CompileOptions {
            asset_root: "/assets/".to_string(),
            ..Default::default()
        };
        assert_eq!(opts.asset_path("logo.png"), "/assets/logo.png");
    }
}
