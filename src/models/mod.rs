pub mod error;
pub mod task;
pub mod config;

// Re-export commonly used types
pub use error::UnpickError;
pub use task::{ArchiveInfo, JobOutcome, JobState, VersionInfo, WordListInfo};
pub use config::{CoordinatorOptions, Keyspace, PerformanceProfile};
