use crate::error::RjlsError;
use rjl_common::types::unix_now;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One permit/reject verdict reported by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionRecord {
    /// Source of the request the client decided on.
    pub from: String,
    /// Destination of the request.
    pub to: String,
    /// `true` when the client rejected the request.
    pub rejected: bool,
    /// Unix time the report was received, in seconds.
    pub timestamp: u64,
}

impl DecisionRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>, rejected: bool) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            rejected,
            timestamp: unix_now(),
        }
    }

    /// `REJECT` or `PERMIT`.
    #[must_use]
    pub const fn verdict(&self) -> &'static str {
        if self.rejected {
            "REJECT"
        } else {
            "PERMIT"
        }
    }

    /// The audit-log line for this record, newline included.
    ///
    /// `[<unix_timestamp>]<PERMIT|REJECT> FROM:<from>\tTO:<to>`
    #[must_use]
    pub fn to_log_line(&self) -> String {
        format!(
            "[{}]{} FROM:{}\tTO:{}\n",
            self.timestamp,
            self.verdict(),
            self.from,
            self.to
        )
    }
}

/// Append-only audit sink for decision records.
///
/// Writers are serialized, so lines from concurrent connections never
/// interleave.
#[derive(Debug)]
pub struct DecisionLogger {
    path: PathBuf,
    file: Mutex<File>,
}

impl DecisionLogger {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RjlsError::Persistence`] if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RjlsError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(RjlsError::Persistence)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line for `record` and flushes it.
    ///
    /// # Errors
    ///
    /// Returns [`RjlsError::Persistence`] if the write fails. Later calls
    /// still attempt to write.
    pub async fn log(&self, record: &DecisionRecord) -> Result<(), RjlsError> {
        let line = record.to_log_line();
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(RjlsError::Persistence)?;
        file.flush().await.map_err(RjlsError::Persistence)
    }
}
