use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Latest known content versions for one game variant.
///
/// `versions` lists every known version with the newest first, `branches`
/// maps a beta branch name to the build currently published on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionSnapshot {
    pub versions: Vec<String>,
    #[serde(default)]
    pub branches: BTreeMap<String, String>,
    pub captured_at: DateTime<Utc>,
}

impl VersionSnapshot {
    pub fn new(versions: Vec<String>) -> Self {
        Self {
            versions,
            branches: BTreeMap::new(),
            captured_at: Utc::now(),
        }
    }

    pub fn with_branches(mut self, branches: BTreeMap<String, String>) -> Self {
        self.branches = branches;
        self
    }

    /// Newest version on `branch`, or on the default branch when `None`.
    ///
    /// An unknown branch yields `None` rather than falling back to the default.
    pub fn latest(&self, branch: Option<&str>) -> Option<&str> {
        match branch {
            Some(name) => self.branches.get(name).map(String::as_str),
            None => self.versions.first().map(String::as_str),
        }
    }
}
