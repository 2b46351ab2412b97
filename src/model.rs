use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::Display;

/// Project visibility as reported by GitLab.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Internal,
    Public,
}

/// A project returned by the directory listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Repository {
    /// Full namespaced path, e.g. `group/subgroup/project`.
    pub path: String,
    pub archived: bool,
    pub visibility: Visibility,
}

impl Repository {
    pub fn new(path: impl Into<String>, archived: bool, visibility: Visibility) -> Self {
        Self { path: path.into(), archived, visibility }
    }
}

/// GitLab access tiers, in ascending order of privilege.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    NoAccess,
    MinimalAccess,
    Guest,
    Reporter,
    Developer,
    Maintainer,
    Owner,
    Admin,
}

impl AccessLevel {
    /// Map GitLab's numeric `access_level` to a tier. Unknown codes yield `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        let level = match code {
            0 => AccessLevel::NoAccess,
            5 => AccessLevel::MinimalAccess,
            10 => AccessLevel::Guest,
            20 => AccessLevel::Reporter,
            30 => AccessLevel::Developer,
            40 => AccessLevel::Maintainer,
            50 => AccessLevel::Owner,
            60 => AccessLevel::Admin,
            _ => return None,
        };
        Some(level)
    }

    pub fn code(self) -> u32 {
        match self {
            AccessLevel::NoAccess => 0,
            AccessLevel::MinimalAccess => 5,
            AccessLevel::Guest => 10,
            AccessLevel::Reporter => 20,
            AccessLevel::Developer => 30,
            AccessLevel::Maintainer => 40,
            AccessLevel::Owner => 50,
            AccessLevel::Admin => 60,
        }
    }

    /// Human-readable label, e.g. `Minimal Access`.
    pub fn label(self) -> &'static str {
        match self {
            AccessLevel::NoAccess => "No Access",
            AccessLevel::MinimalAccess => "Minimal Access",
            AccessLevel::Guest => "Guest",
            AccessLevel::Reporter => "Reporter",
            AccessLevel::Developer => "Developer",
            AccessLevel::Maintainer => "Maintainer",
            AccessLevel::Owner => "Owner",
            AccessLevel::Admin => "Admin",
        }
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry of a repository roster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub username: String,
    pub access_level: AccessLevel,
}

impl Member {
    pub fn new(username: impl Into<String>, access_level: AccessLevel) -> Self {
        Self { username: username.into(), access_level }
    }
}

/// A single user's standing on a single repository.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AccessRecord {
    pub repository: String,
    pub access_level: AccessLevel,
}

/// Username → access records, in the order repositories finished processing.
///
/// Records are only added through the aggregator; consumers see a frozen index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AccessIndex {
    users: BTreeMap<String, Vec<AccessRecord>>,
}

impl AccessIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, username: String, record: AccessRecord) {
        self.users.entry(username).or_default().push(record);
    }

    pub fn get(&self, username: &str) -> Option<&[AccessRecord]> {
        self.users.get(username).map(Vec::as_slice)
    }

    /// Usernames ordered case-insensitively, ties broken by the raw name.
    pub fn usernames_case_insensitive(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.users.keys().map(String::as_str).collect();
        names.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)));
        names
    }

    /// Number of distinct users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.users.values().map(Vec::len).sum()
    }
}
