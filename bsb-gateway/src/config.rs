//! Application configuration file

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use bsb_hub::GatewayConfig;
use bsb_sim::SimOptions;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Contents of the gateway's JSON config file
///
/// Gateway keys sit at the top level; the simulated controller used with
/// the `:sim` adapter device is tuned under `simulator`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    #[serde(flatten)]
    pub gateway: GatewayConfig,
    pub simulator: SimOptions,
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("invalid config")?;
        config.gateway.validate()?;
        Ok(config)
    }

    /// Load `path`, or the defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json_str(&json).with_context(|| format!("loading {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No config at {}; using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Simulator options matching the adapter's line polarity
    pub fn simulator_options(&self) -> SimOptions {
        SimOptions {
            inverted: self.gateway.adapter_settings.invert_bytes,
            ..self.simulator.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(AppConfig::from_json_str("{}").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_gateway_keys_at_top_level() {
        let config = AppConfig::from_json_str(
            r#"{
                "bus_address": 16,
                "web_interface_enable": false,
                "loggers": [[8700, 60]],
                "adapter_settings": { "adapter_device": ":sim", "invert_bytes": false },
                "simulator": { "reply_delay_ms": 0, "inverted": true }
            }"#,
        )
        .unwrap();
        assert_eq!(config.gateway.bus_address, 16);
        assert!(!config.gateway.remote_interface_enable);
        assert_eq!(config.gateway.loggers, vec![(8700, 60)]);
        assert_eq!(config.simulator.reply_delay_ms, 0);
        // Polarity follows the adapter, not the simulator section
        assert!(!config.simulator_options().inverted);
    }

    #[test]
    fn test_invalid_gateway_settings_rejected() {
        assert!(AppConfig::from_json_str(r#"{ "n_addresses": 1 }"#).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/bsbgateway.json")).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
