//! Telemetry payload model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical printer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrintState {
    /// No print in progress (also the fallback for unknown state codes).
    #[default]
    Idle,
    /// Print in progress.
    Printing,
    /// Print paused.
    Paused,
    /// Print finished.
    Finished,
    /// Print failed.
    Failed,
}

impl PrintState {
    /// Derive the canonical state from the raw `gcode_state` code.
    ///
    /// The mapping is exact: `RUNNING`, `PAUSE`, `FINISH`, and `FAILED` map
    /// to their states; anything else — including an empty or absent code —
    /// is [`PrintState::Idle`].
    pub fn from_gcode_state(code: &str) -> Self {
        match code {
            "RUNNING" => Self::Printing,
            "PAUSE" => Self::Paused,
            "FINISH" => Self::Finished,
            "FAILED" => Self::Failed,
            _ => Self::Idle,
        }
    }
}

/// Descriptor of the job the printer is currently working on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Job name as reported by the printer.
    pub name: String,
    /// Current layer number.
    pub layer: u32,
    /// Total layer count.
    pub total_layers: u32,
}

/// The most recently observed printer state.
///
/// Snapshots are immutable; the telemetry cache replaces the whole value on
/// each inbound report so readers never see a mix of two updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Canonical print state.
    pub state: PrintState,
    /// Print progress, 0–100.
    pub progress: f64,
    /// Bed temperature (°C).
    pub bed_temp: f64,
    /// Nozzle temperature (°C).
    pub nozzle_temp: f64,
    /// Current job, present only when the report names one.
    pub current_job: Option<JobProgress>,
    /// When this snapshot was decoded.
    pub last_updated: DateTime<Utc>,
}

impl TelemetrySnapshot {
    /// Decode a snapshot from a report payload.
    ///
    /// Returns `None` when the payload has no `print` section; the device
    /// link logs and drops such messages.
    pub fn from_report(payload: &serde_json::Value) -> Option<Self> {
        let print = payload.get("print")?;

        let state = print
            .get("gcode_state")
            .and_then(|v| v.as_str())
            .map(PrintState::from_gcode_state)
            .unwrap_or_default();

        let progress = print
            .get("mc_percent")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 100.0);

        let bed_temp = print.get("bed_temper").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let nozzle_temp = print
            .get("nozzle_temper")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        // A job descriptor exists only when the report carries a non-empty
        // subtask name.
        let current_job = print
            .get("subtask_name")
            .and_then(|v| v.as_str())
            .filter(|name| !name.is_empty())
            .map(|name| JobProgress {
                name: name.to_string(),
                layer: print.get("layer_num").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                total_layers: print
                    .get("total_layer_num")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
            });

        Some(Self {
            state,
            progress,
            bed_temp,
            nozzle_temp,
            current_job,
            last_updated: Utc::now(),
        })
    }
}
