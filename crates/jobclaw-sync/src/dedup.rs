//! Content-addressed dedup against the persisted job database.

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use jobclaw_core::{DedupKey, NormalizedJob, RunHistoryEntry};
use jobclaw_storage::JobStore;
use tracing::info;

/// Records whose key is neither known nor already taken earlier in the batch.
pub fn select_unseen(
    candidates: Vec<NormalizedJob>,
    known: &HashSet<DedupKey>,
) -> Vec<NormalizedJob> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|job| {
            let key = job.dedup_key();
            !known.contains(&key) && seen.insert(key)
        })
        .collect()
}

/// Cycle-level counters written into the run history alongside the merge.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunCounts {
    pub fetched: usize,
    pub filtered: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_secs: f64,
}

pub struct DedupEngine {
    store: JobStore,
}

impl DedupEngine {
    pub fn new(store: JobStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Load, merge unseen records, append a run entry and write back atomically.
    /// Returns the records that were new, each stamped with `first_seen = now`.
    pub async fn commit(
        &self,
        candidates: Vec<NormalizedJob>,
        counts: RunCounts,
        now: DateTime<Utc>,
    ) -> Result<Vec<NormalizedJob>> {
        let mut db = self.store.load().await?;
        let candidate_count = candidates.len();
        let mut fresh = select_unseen(candidates, &db.known_keys());

        for job in &mut fresh {
            job.first_seen = Some(now);
            db.insert_new(job.clone());
        }

        info!(
            candidates = candidate_count,
            new = fresh.len(),
            duplicates = candidate_count - fresh.len(),
            "dedup complete"
        );

        db.push_run(RunHistoryEntry {
            timestamp: now,
            fetched_count: counts.fetched,
            filtered_count: counts.filtered,
            new_count: fresh.len(),
            succeeded: counts.succeeded,
            failed: counts.failed,
            duration_secs: (counts.duration_secs * 10.0).round() / 10.0,
        });
        db.last_updated = Some(now);

        self.store.save(&db).await?;
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobclaw_core::MAX_RUN_HISTORY;

    fn job(title: &str, location: &str) -> NormalizedJob {
        NormalizedJob::new("greenhouse", title, "Acme", location)
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, hour, 0, 0).single().unwrap()
    }

    #[test]
    fn select_unseen_collapses_batch_duplicates_first_wins() {
        let mut first = job("ML Engineer", "Remote");
        first.url = "https://a.example/1".into();
        let mut second = job("  ml engineer ", "remote");
        second.url = "https://b.example/2".into();
        let known = HashSet::from([job("Data Engineer", "Remote").dedup_key()]);

        let out = select_unseen(vec![first, second, job("Data Engineer", "Remote")], &known);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].url, "https://a.example/1");
    }

    #[tokio::test]
    async fn commit_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = DedupEngine::new(JobStore::new(dir.path().join("jobs.json")));
        let batch = vec![job("ML Engineer", "Remote"), job("SWE", "Austin, TX")];

        let first = engine.commit(batch.clone(), RunCounts::default(), at(1)).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|j| j.first_seen == Some(at(1))));

        let second = engine.commit(batch, RunCounts::default(), at(2)).await.unwrap();
        assert!(second.is_empty());

        let db = engine.store().load().await.unwrap();
        assert_eq!(db.jobs.len(), 2);
        assert!(db.jobs.values().all(|j| j.first_seen == Some(at(1))));
        assert_eq!(db.run_history.len(), 2);
        assert_eq!(db.run_history[1].new_count, 0);
        assert_eq!(db.last_updated, Some(at(2)));
    }

    #[tokio::test]
    async fn run_history_stays_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let engine = DedupEngine::new(JobStore::new(dir.path().join("jobs.json")));
        for i in 0..(MAX_RUN_HISTORY + 3) {
            let counts = RunCounts {
                fetched: i,
                ..RunCounts::default()
            };
            engine.commit(Vec::new(), counts, at(3)).await.unwrap();
        }
        let db = engine.store().load().await.unwrap();
        assert_eq!(db.run_history.len(), MAX_RUN_HISTORY);
        assert_eq!(db.run_history[0].fetched_count, 3);
    }

    #[tokio::test]
    async fn corrupt_database_fails_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{ not json").unwrap();
        let engine = DedupEngine::new(JobStore::new(&path));

        let err = engine
            .commit(vec![job("ML Engineer", "Remote")], RunCounts::default(), at(4))
            .await;
        assert!(err.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }
}
