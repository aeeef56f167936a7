//! Job submission: deliver a file to the printer and trigger printing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::commands::PrinterCommand;
use crate::config::PrinterConfig;
use crate::error::{BambuError, Result};
use crate::mqtt::{CommandChannel, DeviceLink};
use crate::transfer::{FileTransfer, FtpTransfer};

/// Project file extension the printer expects.
pub const PROJECT_EXTENSION: &str = "3mf";

/// One submission attempt.
///
/// Created when a submission starts; its identifier is the correlation key
/// threaded into the start command. The job's lifecycle ends when the
/// submission call returns — completion is only observable via telemetry.
#[derive(Debug, Clone)]
pub struct PrintJob {
    /// Unique identifier for this submission.
    pub id: Uuid,
    /// Local path of the submitted file.
    pub file: PathBuf,
    /// Human-readable print name.
    pub name: String,
    /// When the submission started.
    pub submitted_at: DateTime<Utc>,
}

impl PrintJob {
    fn new(file: &Path, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            file: file.to_path_buf(),
            name: name.to_string(),
            submitted_at: Utc::now(),
        }
    }

    /// Name the file is stored under on the printer.
    pub fn remote_name(&self) -> String {
        format!("{}.{PROJECT_EXTENSION}", self.name)
    }
}

/// Transfers a job file to the printer and issues the start command.
///
/// Submission is at-most-once: nothing is retried internally, because a
/// repeated transfer may duplicate a partially-uploaded file and a repeated
/// command after an unconfirmed publish may double-trigger a print. The
/// caller decides whether to retry.
pub struct JobSubmitter<C: CommandChannel, T: FileTransfer> {
    config: PrinterConfig,
    link: Arc<C>,
    transfer: T,
}

impl JobSubmitter<DeviceLink, FtpTransfer> {
    /// Create a submitter that shares `link` for commands and opens a fresh
    /// FTP connection per transfer.
    pub fn new(config: PrinterConfig, link: Arc<DeviceLink>) -> Self {
        let transfer = FtpTransfer::new(&config);
        Self::with_channels(config, link, transfer)
    }
}

impl<C: CommandChannel, T: FileTransfer> JobSubmitter<C, T> {
    /// Assemble a submitter from explicit command and transfer channels.
    pub fn with_channels(config: PrinterConfig, link: Arc<C>, transfer: T) -> Self {
        Self { config, link, transfer }
    }

    /// Upload `file_path` to the printer as `{print_name}.3mf` and publish
    /// the start command. Returns the generated job identifier.
    ///
    /// The start command is never published before the transfer has
    /// completed; a failed transfer fails the submission with no command
    /// sent. The device link is established lazily after the transfer — if
    /// that fails, the file may already be on the printer. That partial
    /// state is accepted, not rolled back.
    ///
    /// # Errors
    ///
    /// [`BambuError::NotFound`] when the local file is missing,
    /// [`BambuError::Configuration`] when the printer settings are
    /// incomplete, [`BambuError::Transfer`] when the upload fails,
    /// [`BambuError::Connectivity`] when the link cannot be established or
    /// the command cannot be handed to the transport.
    pub async fn submit(&self, file_path: impl AsRef<Path>, print_name: &str) -> Result<String> {
        let path = file_path.as_ref();
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(BambuError::NotFound(path.display().to_string()));
        }
        self.config.validate()?;

        let job = PrintJob::new(path, print_name);
        let remote = job.remote_name();

        self.transfer.upload(path, &remote).await?;

        self.link.ensure_connected().await?;
        self.link
            .publish_command(PrinterCommand::PrintStart {
                file: remote.clone(),
                job_id: job.id.to_string(),
            })
            .await?;

        info!(job_id = %job.id, file = %remote, "print job submitted");
        Ok(job.id.to_string())
    }
}
