use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::error::{JobError, Result};
use super::models::{AppStatus, JobDir, StatusEntry};

/// Append-only record of status transitions for one job directory.
///
/// The ledger holds no in-memory state: every append opens the file in
/// append mode and every read re-parses the current content, so it can be
/// cloned into a completion task and used from there.
#[derive(Debug, Clone)]
pub struct StatusLedger {
    dir: JobDir,
}

impl StatusLedger {
    pub fn new(dir: JobDir) -> Self {
        Self { dir }
    }

    /// Append one entry as a single JSON line, creating the file if needed.
    pub async fn append(
        &self,
        driver_path: &Path,
        status: AppStatus,
        at: DateTime<Local>,
    ) -> Result<StatusEntry> {
        let path = self.dir.status_path();
        let entry = StatusEntry::new(driver_path, self.dir.path(), status, at);

        let mut line = serde_json::to_vec(&entry)
            .map_err(|source| JobError::CorruptLedger { path: path.clone(), source })?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(JobError::io(&path))?;
        // One write per entry keeps lines whole under O_APPEND.
        file.write_all(&line).await.map_err(JobError::io(&path))?;
        file.flush().await.map_err(JobError::io(&path))?;

        debug!("Ledger {}: appended {}", path.display(), status);
        Ok(entry)
    }

    /// Most recently appended entry.
    pub async fn latest(&self) -> Result<StatusEntry> {
        let path = self.dir.status_path();
        let content = self.read_content().await?;

        match content.lines().rev().find(|l| !l.trim().is_empty()) {
            Some(line) => parse_line(&path, line),
            None => Err(JobError::NotFound { what: "status entry", path }),
        }
    }

    /// Every entry, oldest first.
    pub async fn history(&self) -> Result<Vec<StatusEntry>> {
        let path = self.dir.status_path();
        let content = self.read_content().await?;

        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| parse_line(&path, line))
            .collect()
    }

    async fn read_content(&self) -> Result<String> {
        let path = self.dir.status_path();
        match fs::read(&path).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(JobError::NotFound { what: "status ledger", path })
            }
            Err(e) => Err(JobError::io(path)(e)),
        }
    }
}

fn parse_line(path: &Path, line: &str) -> Result<StatusEntry> {
    serde_json::from_str(line.trim()).map_err(|source| JobError::CorruptLedger {
        path: path.to_path_buf(),
        source,
    })
}
