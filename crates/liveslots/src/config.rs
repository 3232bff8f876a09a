//! Per-vat configuration.

use serde::{Deserialize, Serialize};

/// Build-time options for one vat instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VatConfig {
    /// Name used in log fields; never interpreted.
    pub vat_name: String,
    /// Grants user code the `disavow` power.
    pub enable_disavow: bool,
    /// Grants user code the namespaced key-value store.
    pub enable_vatstore: bool,
}

impl Default for VatConfig {
    fn default() -> Self {
        Self {
            vat_name: "vat".to_string(),
            enable_disavow: false,
            enable_vatstore: false,
        }
    }
}

impl VatConfig {
    pub fn named(vat_name: impl Into<String>) -> Self {
        Self {
            vat_name: vat_name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_withhold_optional_powers() {
        let config = VatConfig::default();
        assert!(!config.enable_disavow);
        assert!(!config.enable_vatstore);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: VatConfig =
            serde_json::from_str(r#"{"vat_name":"alice","enable_disavow":true}"#).unwrap();
        assert_eq!(config.vat_name, "alice");
        assert!(config.enable_disavow);
        assert!(!config.enable_vatstore);
    }
}
