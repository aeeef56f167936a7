//! File transfer channel: per-job FTP upload to the printer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use suppaftp::types::FileType;
use suppaftp::FtpStream;
use tracing::info;

use crate::config::{PrinterConfig, PRINTER_USERNAME};
use crate::error::{BambuError, Result};

/// Upload seam between the job submitter and the wire.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Store the local file on the printer under `remote_name`.
    async fn upload(&self, local: &Path, remote_name: &str) -> Result<()>;
}

/// Plain FTP transfer to the printer's storage.
///
/// A fresh connection is opened and closed for each transfer; there is no
/// pooling. The channel shares the fixed username and per-device access
/// code with the control channel.
pub struct FtpTransfer {
    host: String,
    port: u16,
    access_code: String,
}

impl FtpTransfer {
    /// Create a transfer channel for the configured printer.
    pub fn new(config: &PrinterConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.ftp_port,
            access_code: config.access_code.clone(),
        }
    }
}

#[async_trait]
impl FileTransfer for FtpTransfer {
    async fn upload(&self, local: &Path, remote_name: &str) -> Result<()> {
        let host = self.host.clone();
        let port = self.port;
        let access_code = self.access_code.clone();
        let local: PathBuf = local.to_path_buf();
        let remote = remote_name.to_string();

        // The FTP client blocks; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            upload_blocking(&host, port, &access_code, &local, &remote)
        })
        .await
        .map_err(|e| BambuError::Transfer(format!("upload task failed: {e}")))?
    }
}

fn upload_blocking(
    host: &str,
    port: u16,
    access_code: &str,
    local: &Path,
    remote: &str,
) -> Result<()> {
    let mut ftp = FtpStream::connect((host, port))
        .map_err(|e| BambuError::Transfer(format!("connect to {host}:{port}: {e}")))?;
    ftp.login(PRINTER_USERNAME, access_code)
        .map_err(|e| BambuError::Transfer(format!("login rejected: {e}")))?;
    ftp.transfer_type(FileType::Binary)
        .map_err(|e| BambuError::Transfer(format!("binary mode: {e}")))?;

    let mut file = std::fs::File::open(local)?;
    let bytes = ftp
        .put_file(remote, &mut file)
        .map_err(|e| BambuError::Transfer(format!("STOR {remote}: {e}")))?;
    let _ = ftp.quit();

    info!(remote, bytes, "file uploaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_upload_to_unreachable_printer_is_a_transfer_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"3mf bytes").unwrap();

        // Nothing listens on port 1; the connect is refused immediately.
        let mut config = PrinterConfig::new("127.0.0.1", "12345678", "01S00C123");
        config.ftp_port = 1;

        let transfer = FtpTransfer::new(&config);
        let err = transfer.upload(file.path(), "Vase.3mf").await.unwrap_err();
        assert!(matches!(err, BambuError::Transfer(_)), "got {err:?}");
    }
}
