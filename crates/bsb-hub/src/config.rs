//! Gateway configuration
//!
//! Loaded from a JSON file. Every key is optional and falls back to the
//! default of the classic gateway setup.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::comm::{BusAddresses, BusSettings};
use crate::error::{ConfigError, TransportError};
use crate::gateway::GatewaySettings;
use crate::trace::TriggerKind;
use crate::transport::TransportConfig;

/// Adapter device name selecting the built-in simulated controller
pub const SIMULATED_DEVICE: &str = ":sim";

/// Serial stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum StopBitsSetting {
    /// 1
    One,
    /// 1.5 (accepted in config, refused when opening the port)
    OnePointFive,
    /// 2
    Two,
}

impl TryFrom<f64> for StopBitsSetting {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value == 1.0 {
            Ok(Self::One)
        } else if value == 1.5 {
            Ok(Self::OnePointFive)
        } else if value == 2.0 {
            Ok(Self::Two)
        } else {
            Err(format!("invalid stop bits {value}; expected 1, 1.5 or 2"))
        }
    }
}

impl From<StopBitsSetting> for f64 {
    fn from(value: StopBitsSetting) -> Self {
        match value {
            StopBitsSetting::One => 1.0,
            StopBitsSetting::OnePointFive => 1.5,
            StopBitsSetting::Two => 2.0,
        }
    }
}

impl StopBitsSetting {
    fn to_serial(self) -> Result<StopBits, TransportError> {
        match self {
            StopBitsSetting::One => Ok(StopBits::One),
            StopBitsSetting::Two => Ok(StopBits::Two),
            StopBitsSetting::OnePointFive => Err(TransportError::Unsupported("1.5 stop bits")),
        }
    }
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParitySetting {
    /// No parity bit
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl From<ParitySetting> for Parity {
    fn from(value: ParitySetting) -> Self {
        match value {
            ParitySetting::None => Parity::None,
            ParitySetting::Odd => Parity::Odd,
            ParitySetting::Even => Parity::Even,
        }
    }
}

/// Serial adapter settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "AdapterSettingsFile")]
pub struct AdapterSettings {
    /// Serial port path, or `:sim` for the simulated controller
    pub adapter_device: String,
    /// Baud rate
    pub port_baud: u32,
    /// Stop bits
    pub port_stopbits: StopBitsSetting,
    /// Parity
    pub port_parity: ParitySetting,
    /// Use hardware (CTS) flow control
    pub expect_cts_state: bool,
    /// Write resend time in seconds; writes time out after half of it
    pub write_resend_time: f64,
    /// Adapter inverts the line
    pub invert_bytes: bool,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            adapter_device: "/dev/ttyS0".to_string(),
            port_baud: 4800,
            port_stopbits: StopBitsSetting::One,
            port_parity: ParitySetting::Odd,
            expect_cts_state: true,
            write_resend_time: 0.5,
            invert_bytes: true,
        }
    }
}

/// On-disk form of [`AdapterSettings`], accepting the legacy `adapter_type`
#[derive(Deserialize)]
#[serde(default)]
struct AdapterSettingsFile {
    adapter_type: Option<String>,
    adapter_device: String,
    port_baud: u32,
    port_stopbits: StopBitsSetting,
    port_parity: ParitySetting,
    expect_cts_state: bool,
    write_resend_time: f64,
    invert_bytes: bool,
}

impl Default for AdapterSettingsFile {
    fn default() -> Self {
        let d = AdapterSettings::default();
        Self {
            adapter_type: None,
            adapter_device: d.adapter_device,
            port_baud: d.port_baud,
            port_stopbits: d.port_stopbits,
            port_parity: d.port_parity,
            expect_cts_state: d.expect_cts_state,
            write_resend_time: d.write_resend_time,
            invert_bytes: d.invert_bytes,
        }
    }
}

impl From<AdapterSettingsFile> for AdapterSettings {
    fn from(file: AdapterSettingsFile) -> Self {
        // `"adapter_type": "fake"` predates the `:sim` device name
        let adapter_device = match file.adapter_type.as_deref() {
            Some("fake") => SIMULATED_DEVICE.to_string(),
            _ => file.adapter_device,
        };
        Self {
            adapter_device,
            port_baud: file.port_baud,
            port_stopbits: file.port_stopbits,
            port_parity: file.port_parity,
            expect_cts_state: file.expect_cts_state,
            write_resend_time: file.write_resend_time,
            invert_bytes: file.invert_bytes,
        }
    }
}

impl AdapterSettings {
    /// Whether the simulated controller is selected
    pub fn is_simulated(&self) -> bool {
        self.adapter_device == SIMULATED_DEVICE
    }

    /// Upper bound for one write
    pub fn write_timeout(&self) -> Result<Duration, ConfigError> {
        secs("write_resend_time", self.write_resend_time / 2.0)
    }

    /// Transport options derived from these settings
    pub fn transport_config(&self) -> Result<TransportConfig, ConfigError> {
        Ok(TransportConfig {
            invert_bytes: self.invert_bytes,
            write_timeout: self.write_timeout()?,
            ..TransportConfig::default()
        })
    }

    /// Open the configured serial port
    pub fn open_serial(&self) -> Result<SerialStream, TransportError> {
        let flow_control = if self.expect_cts_state {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        tokio_serial::new(&self.adapter_device, self.port_baud)
            .data_bits(DataBits::Eight)
            .stop_bits(self.port_stopbits.to_serial()?)
            .parity(self.port_parity.into())
            .flow_control(flow_control)
            .open_native_async()
            .map_err(|source| TransportError::Open {
                port: self.adapter_device.clone(),
                source,
            })
    }
}

/// Threshold trigger attached to a logged field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerConfig {
    /// Logged field
    pub field: u32,
    /// Crossing direction
    pub kind: TriggerKind,
    /// Threshold value
    pub threshold: f64,
}

/// Gateway settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Serial adapter
    pub adapter_settings: AdapterSettings,
    /// First of the gateway's own bus addresses
    pub bus_address: u8,
    /// Number of consecutive addresses claimed
    pub n_addresses: u8,
    /// Address of the heating controller
    pub device_address: u8,
    /// Minimum gap between two transmissions, seconds
    pub min_wait_s: f64,
    /// Logging cadence, seconds
    pub atomic_interval: u64,
    /// Window for a reply to a remote request, seconds
    pub request_timeout_s: f64,
    /// Caller-side wait for a remote outcome, seconds
    pub remote_wait_s: f64,
    /// Cancel timeouts of resolved requests
    pub cancel_stale_timeouts: bool,
    /// `(field, interval seconds)` pairs traced periodically
    pub loggers: Vec<(u32, u64)>,
    /// Threshold triggers on logged fields
    pub triggers: Vec<TriggerConfig>,
    /// Enable the local command surface
    pub cmd_interface_enable: bool,
    /// Enable the remote request surface
    #[serde(alias = "web_interface_enable")]
    pub remote_interface_enable: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            adapter_settings: AdapterSettings::default(),
            bus_address: 0x42,
            n_addresses: 3,
            device_address: 0x00,
            min_wait_s: 0.1,
            atomic_interval: 5,
            request_timeout_s: 3.0,
            remote_wait_s: 10.0,
            cancel_stale_timeouts: true,
            loggers: Vec::new(),
            triggers: Vec::new(),
            cmd_interface_enable: true,
            remote_interface_enable: true,
        }
    }
}

fn secs(key: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("{value}: {e}"),
    })
}

impl GatewayConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check every value against its allowed range
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.addresses()?;
        if self.atomic_interval == 0 {
            return Err(ConfigError::Invalid {
                key: "atomic_interval",
                reason: "must be at least 1".into(),
            });
        }
        if self.adapter_settings.port_baud == 0 {
            return Err(ConfigError::Invalid {
                key: "port_baud",
                reason: "must be positive".into(),
            });
        }
        if self.request_timeout()?.is_zero() {
            return Err(ConfigError::Invalid {
                key: "request_timeout_s",
                reason: "must be positive".into(),
            });
        }
        self.remote_wait()?;
        self.min_wait()?;
        self.adapter_settings.write_timeout()?;

        for (field, interval) in &self.loggers {
            if *interval == 0 {
                return Err(ConfigError::Invalid {
                    key: "loggers",
                    reason: format!("field {field} has a zero interval"),
                });
            }
        }
        for trigger in &self.triggers {
            if !self.loggers.iter().any(|(field, _)| *field == trigger.field) {
                return Err(ConfigError::Invalid {
                    key: "triggers",
                    reason: format!("field {} is not logged", trigger.field),
                });
            }
        }
        Ok(())
    }

    /// Gateway address block
    pub fn addresses(&self) -> Result<BusAddresses, ConfigError> {
        BusAddresses::new(self.bus_address, self.n_addresses)
    }

    /// Minimum gap between two transmissions
    pub fn min_wait(&self) -> Result<Duration, ConfigError> {
        secs("min_wait_s", self.min_wait_s)
    }

    /// Window for a reply to a remote request
    pub fn request_timeout(&self) -> Result<Duration, ConfigError> {
        secs("request_timeout_s", self.request_timeout_s)
    }

    /// Caller-side wait for a remote outcome
    pub fn remote_wait(&self) -> Result<Duration, ConfigError> {
        secs("remote_wait_s", self.remote_wait_s)
    }

    /// Settings of the bus layer
    pub fn bus_settings(&self) -> Result<BusSettings, ConfigError> {
        Ok(BusSettings {
            addresses: self.addresses()?,
            device_address: self.device_address,
            min_wait: self.min_wait()?,
        })
    }

    /// Settings of the dispatcher
    pub fn gateway_settings(&self) -> Result<GatewaySettings, ConfigError> {
        Ok(GatewaySettings {
            atomic_interval: self.atomic_interval,
            request_timeout: self.request_timeout()?,
            cancel_stale_timeouts: self.cancel_stale_timeouts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_json_str("{}").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.adapter_settings.port_baud, 4800);
        assert_eq!(config.adapter_settings.port_parity, ParitySetting::Odd);
        assert_eq!(
            config.adapter_settings.write_timeout().unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(config.request_timeout().unwrap(), Duration::from_secs(3));
        assert_eq!(config.remote_wait().unwrap(), Duration::from_secs(10));
        assert!(!config.adapter_settings.is_simulated());
    }

    #[test]
    fn test_legacy_keys() {
        let json = r#"{
            "adapter_settings": {
                "adapter_device": ":sim",
                "port_stopbits": 2,
                "port_parity": "even"
            },
            "bus_address": 32,
            "loggers": [[8700, 60], [8830, 300]],
            "triggers": [{"field": 8830, "kind": "falling_below", "threshold": 40.0}],
            "web_interface_enable": false
        }"#;
        let config = GatewayConfig::from_json_str(json).unwrap();
        assert!(config.adapter_settings.is_simulated());
        assert_eq!(config.adapter_settings.port_stopbits, StopBitsSetting::Two);
        assert_eq!(config.adapter_settings.port_parity, ParitySetting::Even);
        assert_eq!(config.loggers, vec![(8700, 60), (8830, 300)]);
        assert_eq!(config.triggers[0].kind, TriggerKind::FallingBelow);
        assert!(!config.remote_interface_enable);
        assert_eq!(config.addresses().unwrap().base(), 32);
    }

    #[test]
    fn test_legacy_fake_adapter_selects_simulator() {
        let json = r#"{"adapter_settings": {"adapter_type": "fake", "adapter_device": "/dev/ttyUSB0"}}"#;
        let config = GatewayConfig::from_json_str(json).unwrap();
        assert!(config.adapter_settings.is_simulated());
        assert_eq!(config.adapter_settings.adapter_device, SIMULATED_DEVICE);

        let json = r#"{"adapter_settings": {"adapter_type": "serial", "adapter_device": "/dev/ttyUSB0"}}"#;
        let config = GatewayConfig::from_json_str(json).unwrap();
        assert_eq!(config.adapter_settings.adapter_device, "/dev/ttyUSB0");
        assert_eq!(config.adapter_settings.port_baud, 4800);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(GatewayConfig::from_json_str(r#"{"n_addresses": 2}"#).is_err());
        assert!(GatewayConfig::from_json_str(r#"{"atomic_interval": 0}"#).is_err());
        assert!(GatewayConfig::from_json_str(r#"{"min_wait_s": -1.0}"#).is_err());
        assert!(GatewayConfig::from_json_str(r#"{"adapter_settings": {"port_stopbits": 3}}"#).is_err());
        assert!(matches!(
            GatewayConfig::from_json_str(
                r#"{"triggers": [{"field": 1, "kind": "rising_above", "threshold": 1}]}"#
            ),
            Err(ConfigError::Invalid { key: "triggers", .. })
        ));
    }

    #[test]
    fn test_one_and_a_half_stop_bits_refused_by_backend() {
        let settings = AdapterSettings {
            port_stopbits: StopBitsSetting::OnePointFive,
            ..AdapterSettings::default()
        };
        assert!(matches!(
            settings.open_serial(),
            Err(TransportError::Unsupported(_))
        ));
    }
}
