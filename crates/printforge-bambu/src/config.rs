//! Printer connection configuration.

use std::env;
use std::time::Duration;

use crate::error::{BambuError, Result};

/// Fixed username Bambu printers expect on both the MQTT and FTP channels.
pub const PRINTER_USERNAME: &str = "bblp";

/// Environment variable holding the printer's LAN address.
pub const ENV_PRINTER_IP: &str = "BAMBU_PRINTER_IP";
/// Environment variable holding the LAN-mode access code.
pub const ENV_ACCESS_CODE: &str = "BAMBU_ACCESS_CODE";
/// Environment variable holding the device serial number.
pub const ENV_DEVICE_SERIAL: &str = "BAMBU_DEVICE_SERIAL";

/// Connection settings for one printer.
///
/// Constructed explicitly and passed to the components that need it; there
/// is no process-wide configuration singleton.
#[derive(Debug, Clone)]
pub struct PrinterConfig {
    /// Printer LAN address (IP or hostname).
    pub host: String,
    /// Access code from the printer's LAN mode settings.
    pub access_code: String,
    /// Device serial number, used to build the per-device MQTT topics.
    pub serial: String,
    /// CA certificate (DER/PEM bytes) for verifying the control channel.
    ///
    /// `None` — the default — accepts the printer's certificate without
    /// verification. Bambu devices present a factory self-signed
    /// certificate, so this is a deliberate trust-on-first-use style
    /// relaxation, not an oversight. Supply a pinned CA to enforce
    /// verification.
    pub ca_certificate: Option<Vec<u8>>,
    /// MQTT control channel port.
    pub mqtt_port: u16,
    /// FTP file transfer port.
    pub ftp_port: u16,
    /// Deadline for establishing the control channel.
    pub connect_timeout: Duration,
}

impl PrinterConfig {
    /// Create a configuration with default ports and timeout.
    pub fn new(
        host: impl Into<String>,
        access_code: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            access_code: access_code.into(),
            serial: serial.into(),
            ca_certificate: None,
            mqtt_port: 8883,
            ftp_port: 990,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Load configuration from `BAMBU_PRINTER_IP`, `BAMBU_ACCESS_CODE`, and
    /// `BAMBU_DEVICE_SERIAL`.
    ///
    /// # Errors
    ///
    /// Returns [`BambuError::Configuration`] when any variable is missing
    /// or empty.
    pub fn from_env() -> Result<Self> {
        let host = required_env(ENV_PRINTER_IP)?;
        let access_code = required_env(ENV_ACCESS_CODE)?;
        let serial = required_env(ENV_DEVICE_SERIAL)?;
        Ok(Self::new(host, access_code, serial))
    }

    /// Check that the fields needed for any network operation are present.
    ///
    /// # Errors
    ///
    /// Returns [`BambuError::Configuration`] naming the first missing field.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(BambuError::Configuration(
                "printer address not configured".into(),
            ));
        }
        if self.access_code.is_empty() {
            return Err(BambuError::Configuration(
                "access code not configured".into(),
            ));
        }
        if self.serial.is_empty() {
            return Err(BambuError::Configuration(
                "device serial not configured".into(),
            ));
        }
        Ok(())
    }

    /// MQTT topic the printer publishes status reports on.
    pub fn report_topic(&self) -> String {
        format!("device/{}/report", self.serial)
    }

    /// MQTT topic the printer accepts commands on.
    pub fn request_topic(&self) -> String {
        format!("device/{}/request", self.serial)
    }
}

fn required_env(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(BambuError::Configuration(format!("{name} is not set"))),
    }
}
