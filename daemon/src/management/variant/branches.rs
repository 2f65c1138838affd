use anyhow::{anyhow, Result};
use gsm_protocol::management::VersionSnapshot;
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::utils::AsyncTimedCache;

pub const DEFAULT_BRANCHES_URL: &str =
    "https://raw.githubusercontent.com/WindowsGSM/SteamAppInfo/main/branches.json";

/// Branch served to an install that names no beta.
const DEFAULT_BRANCH: &str = "public";

/// One version tick reads the index once.
const CACHE_DURATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BranchInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub buildid: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pwdrequired: bool,
    #[serde(default)]
    pub timeupdated: Option<i64>,
}

type Index = HashMap<String, BTreeMap<String, BranchInfo>>;

/// Published build ids per app and branch.
pub struct BranchIndex {
    url: String,
    client: reqwest::Client,
    cache: AsyncTimedCache<Arc<Index>>,
}

impl BranchIndex {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            cache: AsyncTimedCache::new(CACHE_DURATION),
        }
    }

    async fn index(&self) -> Result<Arc<Index>> {
        self.cache
            .get_or_fetch(|| async {
                let index = self
                    .client
                    .get(&self.url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<Index>()
                    .await?;
                Ok::<_, anyhow::Error>(Arc::new(index))
            })
            .await
    }

    pub async fn snapshot(&self, app_id: &str) -> Result<VersionSnapshot> {
        let index = self.index().await?;
        let branches = index
            .get(app_id)
            .ok_or_else(|| anyhow!("app {} is missing from the branch index", app_id))?;
        Self::snapshot_of(branches).ok_or_else(|| anyhow!("app {} has no branches", app_id))
    }

    /// `versions[0]` is the default branch build, every branch is listed in `branches`.
    pub fn snapshot_of(branches: &BTreeMap<String, BranchInfo>) -> Option<VersionSnapshot> {
        let default = branches
            .get(DEFAULT_BRANCH)
            .or_else(|| branches.values().next())?;
        let heads = branches
            .iter()
            .map(|(name, info)| (name.clone(), info.buildid.clone()))
            .collect();
        Some(VersionSnapshot::new(vec![default.buildid.clone()]).with_branches(heads))
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{
        "17515": {
            "prerelease": { "buildid": 1200, "timeupdated": 1700000100 },
            "public": { "buildid": "1190", "description": "", "pwdrequired": false, "timeupdated": 1700000000 }
        },
        "2460": {
            "beta": { "buildid": "77", "pwdrequired": true }
        }
    }"#;

    fn index() -> Index {
        serde_json::from_str(INDEX).unwrap()
    }

    #[test]
    fn public_branch_heads_the_snapshot() {
        let snapshot = BranchIndex::snapshot_of(&index()["17515"]).unwrap();
        assert_eq!(snapshot.latest(None), Some("1190"));
        assert_eq!(snapshot.latest(Some("prerelease")), Some("1200"));
    }

    #[test]
    fn first_branch_stands_in_for_missing_public() {
        let snapshot = BranchIndex::snapshot_of(&index()["2460"]).unwrap();
        assert_eq!(snapshot.versions, vec!["77".to_string()]);
        assert!(index()["2460"]["beta"].pwdrequired);
    }

    #[test]
    fn empty_app_has_no_snapshot() {
        assert!(BranchIndex::snapshot_of(&BTreeMap::new()).is_none());
    }
}
