pub mod allocator;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod log_reader;
pub mod models;

// Re-export commonly used types
pub use allocator::SlotAllocator;
pub use error::{JobError, Result};
pub use guard::{DeleteOutcome, LifecycleGuard};
pub use log_reader::LogReader;
pub use models::{AppStatus, JobDir, StatusEntry};
