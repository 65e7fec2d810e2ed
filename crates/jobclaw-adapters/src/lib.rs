//! Source adapter contract + one implementation per upstream source family.
//!
//! Adapters are stateless: each call to [`SourceAdapter::fetch`] issues its
//! own requests through the shared [`HttpFetcher`] and maps whatever comes
//! back onto [`NormalizedJob`]. Transport failures are errors (and retried
//! by the caller); a body in an unexpected shape is zero results.

use async_trait::async_trait;
use jobclaw_core::{NormalizedJob, PlatformKind, RegistryEntry};
use jobclaw_storage::{FetchError, HttpFetcher};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

pub mod aggregators;
pub mod ats;
pub mod boards;
pub mod community;
pub mod extract;
pub mod markdown;

pub const CRATE_NAME: &str = "jobclaw-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Transport(#[from] FetchError),
    #[error("invalid slug {slug:?}: {reason}")]
    InvalidSlug { slug: String, reason: &'static str },
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Transport(_))
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Written into `NormalizedJob::source_id`; also the key for disabling a source.
    fn source_id(&self) -> &str;

    /// Human-readable label used in per-source error strings.
    fn describe(&self) -> String;

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError>;
}

/// Registry-parameterized ATS adapter for one company; `None` for unsupported platforms.
pub fn adapter_for_entry(entry: &RegistryEntry) -> Option<Box<dyn SourceAdapter>> {
    let company = entry.company.clone();
    let slug = entry.platform_slug.clone();
    match entry.platform_kind {
        PlatformKind::Greenhouse => Some(Box::new(ats::GreenhouseAdapter::new(company, slug))),
        PlatformKind::Lever => Some(Box::new(ats::LeverAdapter::new(company, slug))),
        PlatformKind::Ashby => Some(Box::new(ats::AshbyAdapter::new(company, slug))),
        PlatformKind::SmartRecruiters => {
            Some(Box::new(ats::SmartRecruitersAdapter::new(company, slug)))
        }
        PlatformKind::BambooHr => Some(Box::new(ats::BambooHrAdapter::new(company, slug))),
        PlatformKind::Workday => Some(Box::new(ats::WorkdayAdapter::new(company, slug))),
        PlatformKind::Unsupported => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgoliaCredentials {
    pub app_id: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct BuiltinOptions {
    /// Enables the Work at a Startup source.
    pub yc_algolia: Option<AlgoliaCredentials>,
}

/// Parameter-less sources: job boards, aggregators and community repositories.
pub fn builtin_sources(options: &BuiltinOptions) -> Vec<Box<dyn SourceAdapter>> {
    let mut sources: Vec<Box<dyn SourceAdapter>> = vec![
        Box::new(boards::RemoteOkAdapter),
        Box::new(boards::RemotiveAdapter),
        Box::new(boards::DiceAdapter),
        Box::new(boards::HackerNewsAdapter),
    ];
    for feed in boards::WE_WORK_REMOTELY_FEEDS {
        sources.push(Box::new(boards::WeWorkRemotelyAdapter::new(feed)));
    }
    for query in aggregators::HIRING_CAFE_QUERIES {
        sources.push(Box::new(aggregators::HiringCafeAdapter::new(query)));
    }
    for query in aggregators::JOBRIGHT_QUERIES {
        sources.push(Box::new(aggregators::JobrightAdapter::new(query)));
    }
    if let Some(creds) = &options.yc_algolia {
        sources.push(Box::new(aggregators::YcWorkAtStartupAdapter::new(creds.clone())));
    }
    for repo in community::simplify_repos() {
        sources.push(Box::new(repo));
    }
    for repo in community::markdown_repos() {
        sources.push(Box::new(repo));
    }
    sources
}

pub(crate) fn parse_json_body(body: &[u8], source_id: &str) -> Option<JsonValue> {
    match serde_json::from_slice(body) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(source_id, error = %err, "body is not JSON; treating as zero results");
            None
        }
    }
}

pub(crate) fn shape_mismatch(source_id: &str, what: &str) -> Vec<NormalizedJob> {
    debug!(source_id, what, "unexpected response shape; treating as zero results");
    Vec::new()
}
