//! Core domain model for JobClaw: the normalized job record and the
//! persisted/returned shapes every other crate agrees on.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CRATE_NAME: &str = "jobclaw-core";

/// Maximum run history entries retained in the job database.
pub const MAX_RUN_HISTORY: usize = 200;

/// Hex width of a dedup key. Matches keys already written by earlier deployments.
const DEDUP_KEY_HEX_LEN: usize = 16;

/// Canonical record every adapter emits and the store persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedJob {
    pub title: String,
    pub company: String,
    pub location: String,
    #[serde(default)]
    pub url: String,
    /// Raw upstream date: ISO-8601, a unix timestamp or a relative phrase.
    #[serde(default)]
    pub date_posted: String,
    pub source_id: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub matched_categories: BTreeSet<String>,
}

impl NormalizedJob {
    pub fn new(
        source_id: impl Into<String>,
        title: impl Into<String>,
        company: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            company: company.into(),
            location: location.into(),
            url: String::new(),
            date_posted: String::new(),
            source_id: source_id.into(),
            external_id: None,
            first_seen: None,
            matched_categories: BTreeSet::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_date_posted(mut self, date_posted: impl Into<String>) -> Self {
        self.date_posted = date_posted.into();
        self
    }

    /// Empty ids are treated as absent.
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        let id = external_id.into();
        self.external_id = if id.trim().is_empty() { None } else { Some(id) };
        self
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::from_parts(&self.title, &self.company, &self.location)
    }
}

/// Content hash identifying one logical job across sources.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn from_parts(title: &str, company: &str, location: &str) -> Self {
        let raw = format!(
            "{}|{}|{}",
            title.trim().to_lowercase(),
            company.trim().to_lowercase(),
            location.trim().to_lowercase()
        );
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        let mut hex = hex::encode(hasher.finalize());
        hex.truncate(DEDUP_KEY_HEX_LEN);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ATS platforms that take a per-company slug from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Greenhouse,
    Lever,
    Ashby,
    #[serde(alias = "smart_recruiters")]
    SmartRecruiters,
    #[serde(alias = "bamboo_hr")]
    BambooHr,
    Workday,
    #[serde(other)]
    Unsupported,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Greenhouse => "greenhouse",
            PlatformKind::Lever => "lever",
            PlatformKind::Ashby => "ashby",
            PlatformKind::SmartRecruiters => "smartrecruiters",
            PlatformKind::BambooHr => "bamboohr",
            PlatformKind::Workday => "workday",
            PlatformKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub company: String,
    #[serde(alias = "ats")]
    pub platform_kind: PlatformKind,
    #[serde(alias = "slug")]
    pub platform_slug: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub fetched_count: usize,
    pub filtered_count: usize,
    pub new_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_secs: f64,
}

/// Persistent known-jobs set plus bounded run history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobDatabase {
    #[serde(default)]
    pub jobs: BTreeMap<DedupKey, NormalizedJob>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_history: Vec<RunHistoryEntry>,
}

impl JobDatabase {
    pub fn known_keys(&self) -> HashSet<DedupKey> {
        self.jobs.keys().cloned().collect()
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.jobs.contains_key(key)
    }

    /// Inserts a record unless its key is already present; existing entries keep their `first_seen`.
    pub fn insert_new(&mut self, job: NormalizedJob) -> bool {
        let key = job.dedup_key();
        if self.jobs.contains_key(&key) {
            return false;
        }
        self.jobs.insert(key, job);
        true
    }

    pub fn push_run(&mut self, entry: RunHistoryEntry) {
        self.run_history.push(entry);
        if self.run_history.len() > MAX_RUN_HISTORY {
            let excess = self.run_history.len() - MAX_RUN_HISTORY;
            self.run_history.drain(..excess);
        }
    }
}

/// Structured summary of one ingestion cycle, consumed by presentation layers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CycleResult {
    pub new_records: Vec<NormalizedJob>,
    pub total_fetched: usize,
    /// Records left after the role filter.
    pub total_filtered: usize,
    pub total_in_region: usize,
    pub total_recent: usize,
    pub total_new: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    pub errors: Vec<String>,
    pub duration_secs: f64,
}

impl CycleResult {
    /// Zero-count result carrying a single configuration error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Self::default()
        }
    }
}
