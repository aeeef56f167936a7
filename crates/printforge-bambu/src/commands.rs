//! Control messages published to the printer's request topic.

use serde_json::json;

/// Originator tag stamped on every command.
const ORIGINATOR: &str = "printforge";

/// Command to send to the printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterCommand {
    /// Request a full status push so the telemetry cache is primed without
    /// waiting for the next periodic report.
    PushAll,
    /// Start printing an uploaded project file.
    PrintStart {
        /// File name on the printer, as uploaded (e.g. `Vase.3mf`).
        file: String,
        /// Correlation identifier threading this command back to the
        /// submission that produced it.
        job_id: String,
    },
}

impl PrinterCommand {
    /// Serialize to the printer's JSON payload.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PrinterCommand::PushAll => json!({
                "pushing": {
                    "sequence_id": "0",
                    "command": "pushall"
                }
            }),

            PrinterCommand::PrintStart { file, job_id } => json!({
                "print": {
                    "command": "project_file",
                    "param": file,
                    "sequence_id": job_id,
                    "user_id": ORIGINATOR
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_all_payload() {
        let json = PrinterCommand::PushAll.to_json();
        assert_eq!(json["pushing"]["command"].as_str(), Some("pushall"));
    }

    #[test]
    fn test_print_start_payload() {
        let cmd = PrinterCommand::PrintStart {
            file: "Vase.3mf".into(),
            job_id: "3e9a1c52-0000-4000-8000-0000deadbeef".into(),
        };
        let json = cmd.to_json();

        assert_eq!(json["print"]["command"].as_str(), Some("project_file"));
        assert_eq!(json["print"]["param"].as_str(), Some("Vase.3mf"));
        assert_eq!(
            json["print"]["sequence_id"].as_str(),
            Some("3e9a1c52-0000-4000-8000-0000deadbeef")
        );
        assert_eq!(json["print"]["user_id"].as_str(), Some(ORIGINATOR));
    }
}
