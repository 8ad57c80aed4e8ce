use std::io::ErrorKind;
use tokio::fs;

use super::error::{JobError, Result};
use super::models::JobDir;

/// Bounded, cursor-free reads of a job's output log.
pub struct LogReader;

impl LogReader {
    /// Snapshot the log and return the window of `count` lines starting at
    /// line `offset` (`None` for every remaining line).
    ///
    /// Only newline-terminated lines are visible; a trailing line the worker
    /// is still writing is left out. An offset past the end yields nothing.
    pub async fn read(dir: &JobDir, offset: usize, count: Option<usize>) -> Result<LogLines> {
        let path = dir.log_path();

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let (what, path) = if fs::try_exists(dir.path()).await.unwrap_or(false) {
                    ("output log", path)
                } else {
                    ("job directory", dir.path().to_path_buf())
                };
                return Err(JobError::NotFound { what, path });
            }
            Err(e) => return Err(JobError::io(path)(e)),
        };

        let complete = match bytes.iter().rposition(|b| *b == b'\n') {
            Some(end) => &bytes[..=end],
            None => &[][..],
        };

        Ok(LogLines {
            buf: String::from_utf8_lossy(complete).into_owned(),
            pos: 0,
            skip: offset,
            remaining: count,
        })
    }
}

/// Lazily yields lines from one log snapshot.
#[derive(Debug)]
pub struct LogLines {
    buf: String,
    pos: usize,
    skip: usize,
    remaining: Option<usize>,
}

impl LogLines {
    fn next_line(&mut self) -> Option<&str> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let rest = &self.buf[self.pos..];
        let len = rest.find('\n').unwrap_or(rest.len());
        let line = &rest[..len];
        self.pos += len + 1;
        Some(line.strip_suffix('\r').unwrap_or(line))
    }
}

impl Iterator for LogLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.remaining == Some(0) {
            return None;
        }
        while self.skip > 0 {
            self.next_line()?;
            self.skip -= 1;
        }
        let line = self.next_line()?.to_string();
        if let Some(n) = self.remaining.as_mut() {
            *n -= 1;
        }
        Some(line)
    }
}
