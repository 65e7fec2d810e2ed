//! Ingestion cycle orchestration: configuration, filters, dedup and scheduling.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use jobclaw_adapters::{AlgoliaCredentials, BuiltinOptions};
use jobclaw_core::{CycleResult, RegistryEntry};
use serde::Deserialize;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

pub mod dedup;
pub mod geo;
pub mod pipeline;
pub mod recency;
pub mod role;

pub use dedup::{select_unseen, DedupEngine, RunCounts};
pub use geo::{GeoDecision, LocationFilter};
pub use pipeline::{CycleFilters, IngestionPipeline, SourcePlan};
pub use recency::RecencyWindow;
pub use role::RoleTaxonomy;

pub const CRATE_NAME: &str = "jobclaw-sync";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("source registry not found at {}", .path.display())]
    MissingRegistry { path: PathBuf },
    #[error("source registry {} lists no companies", .path.display())]
    EmptyRegistry { path: PathBuf },
    #[error("role keyword file {} defines no keywords", .path.display())]
    EmptyTaxonomy { path: PathBuf },
    #[error("reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RegistryFile {
    List(Vec<RegistryEntry>),
    Document {
        #[serde(default)]
        companies: Vec<RegistryEntry>,
        #[serde(default)]
        disabled_sources: Vec<String>,
    },
}

/// Companies to poll through their ATS, plus source ids switched off for every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRegistry {
    pub companies: Vec<RegistryEntry>,
    pub disabled_sources: BTreeSet<String>,
}

impl SourceRegistry {
    /// YAML or JSON; either a bare list of entries or `{companies, disabled_sources}`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::MissingRegistry {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let registry = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if registry.companies.is_empty() {
            return Err(ConfigError::EmptyRegistry {
                path: path.to_path_buf(),
            });
        }
        Ok(registry)
    }

    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(match serde_yaml::from_str(text)? {
            RegistryFile::List(companies) => Self {
                companies,
                disabled_sources: BTreeSet::new(),
            },
            RegistryFile::Document {
                companies,
                disabled_sources,
            } => Self {
                companies,
                disabled_sources: disabled_sources.into_iter().collect(),
            },
        })
    }

    pub fn is_disabled(&self, source_id: &str) -> bool {
        self.disabled_sources.contains(source_id)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workspace_root: PathBuf,
    pub registry_path: PathBuf,
    pub keywords_path: PathBuf,
    pub locations_path: PathBuf,
    pub jobs_db_path: PathBuf,
    pub window_hours: u32,
    pub max_concurrent: usize,
    pub per_host_concurrency: usize,
    pub http_timeout_secs: u64,
    pub source_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_secs: u64,
    pub user_agent: String,
    pub scheduler_cron: String,
    pub yc_algolia: Option<AlgoliaCredentials>,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults for everything, rooted at `root`.
    pub fn for_workspace(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self::from_lookup(|key| match key {
            "JOBCLAW_WORKSPACE_ROOT" => Some(root.display().to_string()),
            _ => None,
        })
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let num = |key: &str, default: u64| {
            var(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let workspace_root = var("JOBCLAW_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let path = |key: &str, default: &str| {
            var(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| workspace_root.join(default))
        };

        let yc_algolia = match (var("YC_ALGOLIA_APP_ID"), var("YC_ALGOLIA_API_KEY")) {
            (Some(app_id), Some(api_key)) => Some(AlgoliaCredentials { app_id, api_key }),
            _ => None,
        };

        Self {
            registry_path: path("JOBCLAW_REGISTRY_PATH", "config/sources.yaml"),
            keywords_path: path("JOBCLAW_KEYWORDS_PATH", "config/role_keywords.yaml"),
            locations_path: path("JOBCLAW_LOCATIONS_PATH", "config/us_locations.yaml"),
            jobs_db_path: path("JOBS_DB_PATH", "data/jobs.json"),
            window_hours: u32::try_from(num("JOBCLAW_WINDOW_HOURS", 24)).unwrap_or(u32::MAX),
            max_concurrent: num("JOBCLAW_MAX_CONCURRENT", 25) as usize,
            per_host_concurrency: num("JOBCLAW_PER_HOST_CONCURRENCY", 5) as usize,
            http_timeout_secs: num("JOBCLAW_HTTP_TIMEOUT_SECS", 30),
            source_timeout_secs: num("JOBCLAW_SOURCE_TIMEOUT_SECS", 90),
            max_retries: num("JOBCLAW_MAX_RETRIES", 2) as usize,
            retry_delay_secs: num("JOBCLAW_RETRY_DELAY_SECS", 2),
            user_agent: var("JOBCLAW_USER_AGENT")
                .unwrap_or_else(|| "JobClaw/2.0 (job aggregator bot)".to_string()),
            scheduler_cron: var("JOBCLAW_SCHEDULER_CRON")
                .unwrap_or_else(|| "0 */30 * * * *".to_string()),
            yc_algolia,
            workspace_root,
        }
    }

    pub fn builtin_options(&self) -> BuiltinOptions {
        BuiltinOptions {
            yc_algolia: self.yc_algolia.clone(),
        }
    }
}

pub async fn run_cycle_once_from_env(window_hours: Option<u32>) -> Result<CycleResult> {
    let pipeline = IngestionPipeline::new(SyncConfig::from_env())?;
    pipeline.run_cycle(window_hours).await
}

/// Cron-driven cycles. A tick that fires while a cycle is still running is skipped.
pub async fn build_scheduler(pipeline: Arc<IngestionPipeline>) -> Result<JobScheduler> {
    let cron = pipeline.config().scheduler_cron.clone();
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            match pipeline.try_run_cycle(None).await {
                Ok(Some(result)) => info!(
                    new = result.total_new,
                    failed = result.sources_failed,
                    "scheduled cycle finished"
                ),
                Ok(None) => warn!("previous cycle still running; skipping tick"),
                Err(err) => error!(error = %err, "scheduled cycle failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobclaw_core::PlatformKind;

    fn workspace_config() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config")
    }

    #[test]
    fn registry_accepts_bare_lists_and_documents() {
        let list = SourceRegistry::parse("- company: Acme\n  ats: lever\n  slug: acme\n").unwrap();
        assert_eq!(list.companies[0].platform_kind, PlatformKind::Lever);
        assert!(list.disabled_sources.is_empty());

        let doc = SourceRegistry::parse(
            r#"{"companies": [{"company": "Beta", "platform_kind": "workday", "platform_slug": "beta:1:Careers"}],
                "disabled_sources": ["dice"]}"#,
        )
        .unwrap();
        assert_eq!(doc.companies[0].platform_kind, PlatformKind::Workday);
        assert!(doc.is_disabled("dice"));
        assert!(!doc.is_disabled("remoteok"));
    }

    #[test]
    fn unknown_platforms_do_not_break_the_registry() {
        let reg = SourceRegistry::parse(
            "companies:\n  - {company: Acme, ats: greenhouse, slug: acme}\n  - {company: Old, ats: taleo, slug: old}\n",
        )
        .unwrap();
        assert_eq!(reg.companies[1].platform_kind, PlatformKind::Unsupported);
    }

    #[test]
    fn empty_registry_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.yaml");
        std::fs::write(&path, "companies: []\n").unwrap();
        assert!(matches!(
            SourceRegistry::load(&path),
            Err(ConfigError::EmptyRegistry { .. })
        ));
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            SourceRegistry::load(&path),
            Err(ConfigError::EmptyRegistry { .. })
        ));
    }

    #[test]
    fn config_defaults_and_overrides() {
        let defaults = SyncConfig::for_workspace("/srv/jobclaw");
        assert_eq!(defaults.jobs_db_path, PathBuf::from("/srv/jobclaw/data/jobs.json"));
        assert_eq!(defaults.window_hours, 24);
        assert_eq!(defaults.max_concurrent, 25);
        assert_eq!(defaults.per_host_concurrency, 5);
        assert_eq!(defaults.source_timeout_secs, 90);
        assert!(defaults.yc_algolia.is_none());

        let custom = SyncConfig::from_lookup(|key| match key {
            "JOBS_DB_PATH" => Some("/tmp/jobs.json".into()),
            "JOBCLAW_WINDOW_HOURS" => Some("72".into()),
            "JOBCLAW_MAX_RETRIES" => Some("not a number".into()),
            "YC_ALGOLIA_APP_ID" => Some("APP".into()),
            "YC_ALGOLIA_API_KEY" => Some("KEY".into()),
            _ => None,
        });
        assert_eq!(custom.jobs_db_path, PathBuf::from("/tmp/jobs.json"));
        assert_eq!(custom.window_hours, 72);
        assert_eq!(custom.max_retries, 2);
        assert_eq!(custom.registry_path, PathBuf::from("./config/sources.yaml"));
        assert!(custom.builtin_options().yc_algolia.is_some());
    }

    #[test]
    fn shipped_config_files_load() {
        let root = workspace_config();
        let registry = SourceRegistry::load(&root.join("sources.yaml")).unwrap();
        assert!(registry.companies.len() >= 10);
        assert!(registry
            .companies
            .iter()
            .all(|c| c.platform_kind != PlatformKind::Unsupported));

        let taxonomy = RoleTaxonomy::load(&root.join("role_keywords.yaml")).unwrap();
        assert!(taxonomy.len() > 100);
        assert!(taxonomy.categories().contains("AI/ML"));
        assert!(!taxonomy.categories_for("Machine Learning Engineer").is_empty());

        let locations = LocationFilter::load(&root.join("us_locations.yaml")).unwrap();
        assert_eq!(locations.classify("Remote - US"), GeoDecision::IncludePattern);
        assert_eq!(locations.classify("London, United Kingdom"), GeoDecision::Excluded);
    }

    #[test]
    fn shipped_locations_keep_us_namesakes_of_foreign_cities() {
        let locations = LocationFilter::load(&workspace_config().join("us_locations.yaml")).unwrap();
        for loc in [
            "Melbourne, FL",
            "Berlin, NH",
            "London, KY",
            "Remote - New England",
            "Indianapolis, Indiana",
            "Warsaw, IN",
            "Amsterdam, NY",
            "Lake Zurich, IL",
        ] {
            assert!(locations.admits(loc), "{loc} should be admitted");
        }
        for loc in [
            "London, England",
            "London, UK",
            "Melbourne, VIC, Australia",
            "Berlin, Germany",
            "Bengaluru, Karnataka, India",
            "Remote (India)",
            "Toronto, ON",
        ] {
            assert_eq!(locations.classify(loc), GeoDecision::Excluded, "{loc}");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scheduler_accepts_the_default_cron() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(IngestionPipeline::new(SyncConfig::for_workspace(dir.path())).unwrap());
        let mut sched = build_scheduler(pipeline).await.unwrap();
        sched.shutdown().await.unwrap();
    }
}
