//! One ingestion cycle: fan out over sources, filter, dedup, persist.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use jobclaw_adapters::{adapter_for_entry, builtin_sources, AdapterError, BuiltinOptions, SourceAdapter};
use jobclaw_core::{CycleResult, NormalizedJob};
use jobclaw_storage::{
    retry_with_backoff, FetchError, HttpClientConfig, HttpFetcher, JobStore, RetryPolicy, Sleeper,
    TokioSleeper,
};
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dedup::{DedupEngine, RunCounts};
use crate::geo::LocationFilter;
use crate::recency::RecencyWindow;
use crate::role::RoleTaxonomy;
use crate::{ConfigError, SourceRegistry, SyncConfig};

pub const MAX_REPORTED_ERRORS: usize = 20;

/// Immutable filter tables for one cycle.
#[derive(Debug, Clone)]
pub struct CycleFilters {
    pub taxonomy: RoleTaxonomy,
    pub locations: LocationFilter,
    pub window: RecencyWindow,
}

impl CycleFilters {
    pub fn load(config: &SyncConfig, window_hours: Option<u32>) -> Result<Self, ConfigError> {
        Ok(Self {
            taxonomy: RoleTaxonomy::load(&config.keywords_path)?,
            locations: LocationFilter::load(&config.locations_path)?,
            window: RecencyWindow::new(window_hours.unwrap_or(config.window_hours)),
        })
    }
}

/// The adapters a cycle will run, plus registry entries that could not become one.
#[derive(Default)]
pub struct SourcePlan {
    pub adapters: Vec<Box<dyn SourceAdapter>>,
    pub rejected: Vec<String>,
}

impl SourcePlan {
    pub fn build(registry: &SourceRegistry, options: &BuiltinOptions) -> Self {
        let mut plan = SourcePlan::default();
        for entry in &registry.companies {
            match adapter_for_entry(entry) {
                Some(adapter) => plan.adapters.push(adapter),
                None => plan
                    .rejected
                    .push(format!("{}: unsupported platform", entry.company)),
            }
        }
        plan.adapters.extend(builtin_sources(options));
        plan.adapters
            .retain(|adapter| !registry.is_disabled(adapter.source_id()));
        plan
    }

    pub fn from_adapters(adapters: Vec<Box<dyn SourceAdapter>>) -> Self {
        Self {
            adapters,
            rejected: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.adapters.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct SourceOutcome {
    label: String,
    result: Result<Vec<NormalizedJob>, AdapterError>,
}

pub struct IngestionPipeline {
    config: SyncConfig,
    http: HttpFetcher,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    dedup: DedupEngine,
    cycle_lock: Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            global_concurrency: config.max_concurrent,
            per_host_concurrency: config.per_host_concurrency,
        })?;
        let retry = RetryPolicy {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs(config.retry_delay_secs),
            ..RetryPolicy::default()
        };
        let dedup = DedupEngine::new(JobStore::new(config.jobs_db_path.clone()));
        Ok(Self {
            config,
            http,
            retry,
            sleeper: Arc::new(TokioSleeper),
            dedup,
            cycle_lock: Mutex::new(()),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &JobStore {
        self.dedup.store()
    }

    pub fn source_plan(&self) -> Result<SourcePlan, ConfigError> {
        let registry = SourceRegistry::load(&self.config.registry_path)?;
        Ok(SourcePlan::build(&registry, &self.config.builtin_options()))
    }

    /// Configuration problems come back as a zero-count result; only
    /// persistence failures are `Err`.
    pub async fn run_cycle(&self, window_hours: Option<u32>) -> Result<CycleResult> {
        let loaded = self.source_plan().and_then(|plan| {
            CycleFilters::load(&self.config, window_hours).map(|filters| (plan, filters))
        });
        match loaded {
            Ok((plan, filters)) => self.run_with_sources(plan, &filters).await,
            Err(err) => {
                warn!(error = %err, "cycle skipped: configuration error");
                Ok(CycleResult::config_error(err.to_string()))
            }
        }
    }

    /// Runs a cycle unless one is already in flight, in which case `None`.
    pub async fn try_run_cycle(&self, window_hours: Option<u32>) -> Result<Option<CycleResult>> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            return Ok(None);
        };
        self.run_cycle(window_hours).await.map(Some)
    }

    pub async fn run_with_sources(
        &self,
        plan: SourcePlan,
        filters: &CycleFilters,
    ) -> Result<CycleResult> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingestion_cycle", %run_id);
        self.cycle(plan, filters).instrument(span).await
    }

    async fn cycle(&self, plan: SourcePlan, filters: &CycleFilters) -> Result<CycleResult> {
        let started = Instant::now();
        let SourcePlan { adapters, rejected } = plan;
        info!(
            sources = adapters.len(),
            rejected = rejected.len(),
            window_hours = filters.window.hours(),
            "ingestion cycle start"
        );

        let fetches = adapters
            .iter()
            .map(|adapter| self.fetch_source(adapter.as_ref()))
            .collect::<Vec<_>>();
        let outcomes = stream::iter(fetches)
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut errors = rejected;
        let mut failed = errors.len();
        let mut succeeded = 0usize;
        let mut fetched = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(jobs) => {
                    succeeded += 1;
                    fetched.extend(jobs);
                }
                Err(err) => {
                    warn!(source = %outcome.label, error = %err, "source failed");
                    failed += 1;
                    errors.push(format!("{}: {err}", outcome.label));
                }
            }
        }

        let total_fetched = fetched.len();
        info!(total_fetched, succeeded, failed, "fetch complete");

        let role_matched = fetched
            .into_iter()
            .filter_map(|mut job| {
                let categories = filters.taxonomy.categories_for(&job.title);
                if categories.is_empty() {
                    return None;
                }
                job.matched_categories = categories;
                Some(job)
            })
            .collect::<Vec<_>>();
        let total_filtered = role_matched.len();
        info!(total_filtered, total_fetched, "role filter");

        let in_region = role_matched
            .into_iter()
            .filter(|job| filters.locations.admits(&job.location))
            .collect::<Vec<_>>();
        let total_in_region = in_region.len();
        info!(total_in_region, total_filtered, "geography filter");

        let now = Utc::now();
        let recent = in_region
            .into_iter()
            .filter(|job| filters.window.admits(&job.date_posted, now))
            .collect::<Vec<_>>();
        let total_recent = recent.len();
        info!(total_recent, total_in_region, "recency filter");

        let counts = RunCounts {
            fetched: total_fetched,
            filtered: total_filtered,
            succeeded,
            failed,
            duration_secs: started.elapsed().as_secs_f64(),
        };
        let new_records = self.dedup.commit(recent, counts, now).await?;
        let total_new = new_records.len();

        let duration_secs = (started.elapsed().as_secs_f64() * 10.0).round() / 10.0;
        info!(total_new, duration_secs, "ingestion cycle complete");

        errors.truncate(MAX_REPORTED_ERRORS);
        Ok(CycleResult {
            new_records,
            total_fetched,
            total_filtered,
            total_in_region,
            total_recent,
            total_new,
            sources_succeeded: succeeded,
            sources_failed: failed,
            errors,
            duration_secs,
        })
    }

    async fn fetch_source(&self, adapter: &dyn SourceAdapter) -> SourceOutcome {
        let label = adapter.describe();
        let deadline = Duration::from_secs(self.config.source_timeout_secs);
        let result = retry_with_backoff(
            &self.retry,
            self.sleeper.as_ref(),
            AdapterError::is_retryable,
            |_attempt| {
                let label = label.clone();
                async move {
                    match tokio::time::timeout(deadline, adapter.fetch(&self.http)).await {
                        Ok(result) => result,
                        Err(_) => Err(AdapterError::Transport(FetchError::Timeout { url: label })),
                    }
                }
            },
        )
        .await;
        SourceOutcome { label, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use jobclaw_core::{PlatformKind, RegistryEntry};

    #[derive(Default)]
    struct RecordingSleeper {
        slept: StdMutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    struct StubSource {
        id: &'static str,
        jobs: Vec<NormalizedJob>,
    }

    #[async_trait]
    impl SourceAdapter for StubSource {
        fn source_id(&self) -> &str {
            self.id
        }

        fn describe(&self) -> String {
            format!("stub {}", self.id)
        }

        async fn fetch(&self, _http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
            Ok(self.jobs.clone())
        }
    }

    struct FailingSource {
        calls: Arc<AtomicUsize>,
        error: fn() -> AdapterError,
    }

    #[async_trait]
    impl SourceAdapter for FailingSource {
        fn source_id(&self) -> &str {
            "failing"
        }

        fn describe(&self) -> String {
            "Broken Co (greenhouse)".to_string()
        }

        async fn fetch(&self, _http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err((self.error)())
        }
    }

    fn http_503() -> AdapterError {
        AdapterError::Transport(FetchError::HttpStatus {
            status: 503,
            url: "https://boards-api.greenhouse.io/v1/boards/broken/jobs".into(),
        })
    }

    fn bad_slug() -> AdapterError {
        AdapterError::InvalidSlug {
            slug: "broken".into(),
            reason: "expected tenant:shard:site",
        }
    }

    fn filters(window_hours: u32) -> CycleFilters {
        CycleFilters {
            taxonomy: RoleTaxonomy::from_pairs([
                ("software engineer", "SWE"),
                ("ml engineer", "AI/ML"),
                ("data scientist", "Data Science"),
            ]),
            locations: LocationFilter::from_patterns(["Remote", "United States"], ["London", "India"]),
            window: RecencyWindow::new(window_hours),
        }
    }

    fn pipeline(dir: &std::path::Path, sleeper: Arc<RecordingSleeper>) -> IngestionPipeline {
        IngestionPipeline::new(SyncConfig::for_workspace(dir))
            .unwrap()
            .with_sleeper(sleeper)
    }

    fn posting(title: &str, location: &str, date: &str) -> NormalizedJob {
        NormalizedJob::new("stub", title, "Acme", location).with_date_posted(date)
    }

    #[tokio::test]
    async fn two_source_cycle_keeps_only_the_recent_record() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), Arc::default());
        let plan = SourcePlan::from_adapters(vec![
            Box::new(StubSource {
                id: "a",
                jobs: vec![posting("Software Engineer", "Austin, TX", "2024-01-01T00:00:00Z")],
            }),
            Box::new(StubSource {
                id: "b",
                jobs: vec![posting("ML Engineer", "Remote", &Utc::now().to_rfc3339())],
            }),
        ]);

        let result = p.run_with_sources(plan, &filters(24)).await.unwrap();
        assert_eq!(result.total_fetched, 2);
        assert_eq!(result.total_filtered, 2);
        assert_eq!(result.total_in_region, 2);
        assert_eq!(result.total_recent, 1);
        assert_eq!(result.total_new, 1);
        assert_eq!(result.new_records.len(), 1);
        assert_eq!(result.new_records[0].title, "ML Engineer");
        assert!(result.new_records[0].matched_categories.contains("AI/ML"));
        assert!(result.new_records[0].first_seen.is_some());
        assert_eq!(result.sources_succeeded, 2);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn failing_sources_do_not_sink_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let sleeper = Arc::new(RecordingSleeper::default());
        let p = pipeline(dir.path(), sleeper.clone());

        let calls = Arc::new(AtomicUsize::new(0));
        let mut adapters: Vec<Box<dyn SourceAdapter>> = (0..3)
            .map(|_| {
                Box::new(FailingSource {
                    calls: calls.clone(),
                    error: http_503,
                }) as Box<dyn SourceAdapter>
            })
            .collect();
        adapters.push(Box::new(StubSource {
            id: "ok",
            jobs: vec![posting("Data Scientist", "New York, NY", "")],
        }));

        let result = p
            .run_with_sources(SourcePlan::from_adapters(adapters), &filters(24))
            .await
            .unwrap();
        assert_eq!(result.sources_failed, 3);
        assert_eq!(result.sources_succeeded, 1);
        assert_eq!(result.total_new, 1);
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors[0].starts_with("Broken Co (greenhouse): http status 503"));
        // initial attempt plus two retries per source
        assert_eq!(calls.load(Ordering::SeqCst), 9);
        let slept = sleeper.slept.lock().unwrap().clone();
        assert_eq!(slept.len(), 6);
        assert!(slept.contains(&Duration::from_secs(2)));
        assert!(slept.contains(&Duration::from_secs(4)));
    }

    #[tokio::test]
    async fn invalid_slugs_fail_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let sleeper = Arc::new(RecordingSleeper::default());
        let p = pipeline(dir.path(), sleeper.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let plan = SourcePlan::from_adapters(vec![Box::new(FailingSource {
            calls: calls.clone(),
            error: bad_slug,
        })]);

        let result = p.run_with_sources(plan, &filters(24)).await.unwrap();
        assert_eq!(result.sources_failed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.slept.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_list_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), Arc::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let adapters = (0..25)
            .map(|_| {
                Box::new(FailingSource {
                    calls: calls.clone(),
                    error: bad_slug,
                }) as Box<dyn SourceAdapter>
            })
            .collect();

        let result = p
            .run_with_sources(SourcePlan::from_adapters(adapters), &filters(24))
            .await
            .unwrap();
        assert_eq!(result.sources_failed, 25);
        assert_eq!(result.errors.len(), MAX_REPORTED_ERRORS);
    }

    #[tokio::test]
    async fn second_identical_cycle_finds_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), Arc::default());
        let source = || {
            SourcePlan::from_adapters(vec![Box::new(StubSource {
                id: "a",
                jobs: vec![
                    posting("Software Engineer", "Remote", ""),
                    posting("Software Engineer", "London, UK", ""),
                    posting("Account Executive", "Remote", ""),
                ],
            })])
        };

        let first = p.run_with_sources(source(), &filters(24)).await.unwrap();
        assert_eq!(first.total_fetched, 3);
        assert_eq!(first.total_filtered, 2);
        assert_eq!(first.total_in_region, 1);
        assert_eq!(first.total_new, 1);

        let second = p.run_with_sources(source(), &filters(24)).await.unwrap();
        assert_eq!(second.total_new, 0);
        let db = p.store().load().await.unwrap();
        assert_eq!(db.jobs.len(), 1);
        assert_eq!(db.run_history.len(), 2);
    }

    #[tokio::test]
    async fn missing_registry_is_a_config_result_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), Arc::default());
        let result = p.run_cycle(None).await.unwrap();
        assert_eq!(result.total_fetched, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("registry"));
        assert!(!p.store().path().exists());
    }

    #[tokio::test]
    async fn empty_taxonomy_stops_the_cycle_before_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("sources.yaml"),
            "- company: Acme\n  ats: greenhouse\n  slug: acme\n",
        )
        .unwrap();
        std::fs::write(config_dir.join("role_keywords.yaml"), "categories: []\n").unwrap();

        let p = pipeline(dir.path(), Arc::default());
        let result = p.run_cycle(Some(48)).await.unwrap();
        assert_eq!(result.total_fetched, 0);
        assert!(result.errors[0].contains("no keywords"));
        assert!(!p.store().path().exists());
    }

    #[tokio::test]
    async fn corrupt_database_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), Arc::default());
        std::fs::create_dir_all(p.store().path().parent().unwrap()).unwrap();
        std::fs::write(p.store().path(), "[[[").unwrap();
        let plan = SourcePlan::from_adapters(vec![Box::new(StubSource {
            id: "a",
            jobs: vec![posting("Software Engineer", "Remote", "")],
        })]);
        assert!(p.run_with_sources(plan, &filters(24)).await.is_err());
        assert_eq!(std::fs::read_to_string(p.store().path()).unwrap(), "[[[");
    }

    #[test]
    fn plan_reports_unsupported_platforms_and_honours_disabled_sources() {
        let registry = SourceRegistry {
            companies: vec![
                RegistryEntry {
                    company: "Acme".into(),
                    platform_kind: PlatformKind::Greenhouse,
                    platform_slug: "acme".into(),
                },
                RegistryEntry {
                    company: "Legacy Corp".into(),
                    platform_kind: PlatformKind::Unsupported,
                    platform_slug: "legacy".into(),
                },
            ],
            disabled_sources: ["remoteok".to_string(), "dice".to_string()].into(),
        };
        let plan = SourcePlan::build(&registry, &BuiltinOptions::default());
        assert_eq!(plan.rejected, vec!["Legacy Corp: unsupported platform".to_string()]);
        let ids = plan
            .adapters
            .iter()
            .map(|a| a.source_id().to_string())
            .collect::<Vec<_>>();
        assert!(ids.contains(&"greenhouse".to_string()));
        assert!(ids.contains(&"remotive".to_string()));
        assert!(!ids.contains(&"remoteok".to_string()));
        assert!(!ids.contains(&"dice".to_string()));
    }
}
