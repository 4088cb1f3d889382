use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// A commit that changed a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    /// Authored time in the author's UTC offset.
    pub timestamp: DateTime<FixedOffset>,
}
