#![warn(missing_docs)]

//! Bambu Lab printer connectivity.
//!
//! This crate provides:
//! - Printer discovery: passive SSDP listening combined with a
//!   bounded-concurrency TCP scan of the local segment
//! - A persistent MQTT control channel (TLS, per-device access code) with
//!   telemetry decoding into an atomically-replaced snapshot cache
//! - Job submission: FTP upload plus a correlated print-start command
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use printforge_bambu::{discover, DeviceLink, JobSubmitter, PrinterConfig};
//!
//! // Find printers on the local network.
//! let printers = discover(Duration::from_secs(5)).await;
//!
//! // Connect to the configured printer and watch its telemetry.
//! let link = Arc::new(DeviceLink::new(PrinterConfig::from_env()?));
//! link.connect().await?;
//! if let Some(status) = link.status() {
//!     println!("state: {:?}, progress: {}%", status.state, status.progress);
//! }
//!
//! // Upload a sliced model and start printing it.
//! let submitter = JobSubmitter::new(PrinterConfig::from_env()?, link.clone());
//! let job_id = submitter.submit("/tmp/model.3mf", "Vase").await?;
//! println!("submitted job {job_id}");
//! ```

pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod job;
pub mod mqtt;
pub mod scan;
pub mod status;
pub mod telemetry;
pub mod transfer;

pub use commands::PrinterCommand;
pub use config::{PrinterConfig, PRINTER_USERNAME};
pub use discovery::{discover, Device, SETTLE_WINDOW};
pub use error::{BambuError, Result};
pub use job::{JobSubmitter, PrintJob, PROJECT_EXTENSION};
pub use mqtt::{CommandChannel, ConnectionInfo, DeviceLink, LinkState};
pub use scan::{MAX_IN_FLIGHT, SCAN_PORTS};
pub use status::{JobProgress, PrintState, TelemetrySnapshot};
pub use telemetry::TelemetryCache;
pub use transfer::{FileTransfer, FtpTransfer};
