use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use super::error::{JobError, Result};
use super::models::JobDir;

/// Hands out fresh job directories from a fixed, zero-padded numeric namespace
/// (`0000`, `0001`, ...) under the uploads root.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    root: PathBuf,
    width: usize,
    max_slots: usize,
}

impl SlotAllocator {
    /// `max_slots` is clamped to what `width` digits can name.
    pub fn new(root: impl Into<PathBuf>, width: usize, max_slots: usize) -> Self {
        let capacity = 10usize.saturating_pow(width as u32);
        Self {
            root: root.into(),
            width,
            max_slots: max_slots.min(capacity),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot_name(&self, slot: usize) -> String {
        format!("{:0width$}", slot, width = self.width)
    }

    /// Create and return the first unused slot directory.
    ///
    /// A slot that appears between the existence probe and `create_dir`
    /// (a concurrent allocation) is skipped, not reported.
    pub async fn allocate(&self) -> Result<JobDir> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(JobError::io(&self.root))?;

        for slot in 0..self.max_slots {
            let path = self.root.join(self.slot_name(slot));
            if fs::try_exists(&path).await.map_err(JobError::io(&path))? {
                continue;
            }

            match fs::create_dir(&path).await {
                Ok(()) => {
                    debug!("Allocated job directory {}", path.display());
                    return Ok(JobDir::new(path));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Slot {} taken concurrently, trying next", path.display());
                }
                Err(e) => return Err(JobError::io(path)(e)),
            }
        }

        warn!(
            "Upload namespace {} exhausted ({} slots)",
            self.root.display(),
            self.max_slots
        );
        Err(JobError::CapacityExhausted {
            root: self.root.clone(),
            max: self.max_slots,
        })
    }
}
