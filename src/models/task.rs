use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Coordinator state for the currently selected archive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum JobState {
    Idle,
    ArchiveSelected,
    Guessing,
    AwaitingManualPassword,
    Unlocking,
    Extracting,
    Completed,
    Cancelled,
    Failed(String),
}

impl JobState {
    /// States in which a new archive may be selected
    pub fn accepts_selection(&self) -> bool {
        matches!(
            self,
            JobState::Idle | JobState::Completed | JobState::Cancelled | JobState::Failed(_)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled | JobState::Failed(_))
    }

    /// A job thread is running in these states
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            JobState::Guessing
                | JobState::AwaitingManualPassword
                | JobState::Unlocking
                | JobState::Extracting
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::ArchiveSelected => write!(f, "archive selected"),
            JobState::Guessing => write!(f, "guessing"),
            JobState::AwaitingManualPassword => write!(f, "awaiting manual password"),
            JobState::Unlocking => write!(f, "unlocking"),
            JobState::Extracting => write!(f, "extracting"),
            JobState::Completed => write!(f, "completed"),
            JobState::Cancelled => write!(f, "cancelled"),
            JobState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Final outcome of one extraction job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", content = "reason", rename_all = "camelCase")]
pub enum JobOutcome {
    Pending,
    Succeeded,
    Cancelled,
    Failed(String),
}

/// Metadata returned to the presentation layer after selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveInfo {
    pub path: PathBuf,
    pub format: String,
    pub encrypted: bool,
}

/// Result of uploading a password list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WordListInfo {
    pub path: PathBuf,
}

/// Version report for the About/Update badge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub current_version: String,
    pub latest_version: Option<String>,
    pub update_url: Option<String>,
    pub is_latest: bool,
    pub error: Option<String>,
}

impl VersionInfo {
    /// Report the running version; no remote lookup is performed
    pub fn current() -> Self {
        Self {
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            latest_version: None,
            update_url: None,
            is_latest: true,
            error: None,
        }
    }
}
