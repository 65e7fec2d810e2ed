//! Aggregator sites. Their undocumented APIs drift, so every field goes
//! through a wide fallback chain and the list itself may sit under one of
//! several keys.

use async_trait::async_trait;
use jobclaw_core::NormalizedJob;
use jobclaw_storage::{FetchError, HttpFetcher};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::extract::{date_value, first_id, first_str, list_under, str_or_list, UNKNOWN};
use crate::{parse_json_body, shape_mismatch, AdapterError, AlgoliaCredentials, SourceAdapter};

const HIRING_CAFE_SEARCH_URL: &str = "https://hiring.cafe/api/search";
const HIRING_CAFE_JOBS_URL: &str = "https://hiring.cafe/api/jobs";
const JOBRIGHT_SEARCH_URL: &str = "https://jobright.ai/api/jobs/search";
const YC_INDEX: &str = "WaaSJobs_production";
const PAGE_LIMIT: usize = 50;

pub const HIRING_CAFE_QUERIES: [&str; 5] = [
    "software engineer",
    "machine learning engineer",
    "data scientist",
    "data engineer",
    "AI engineer",
];

pub const JOBRIGHT_QUERIES: [&str; 4] = [
    "software engineer",
    "machine learning",
    "data scientist",
    "new grad",
];

/// Shared mapping for aggregator list payloads.
pub(crate) fn parse_listing(source_id: &str, body: &[u8]) -> Vec<NormalizedJob> {
    let Some(value) = parse_json_body(body, source_id) else {
        return Vec::new();
    };
    let Some(items) = list_under(&value, &["jobs", "results", "data"]) else {
        return shape_mismatch(source_id, "no job list under jobs/results/data");
    };
    items
        .iter()
        .filter(|j| j.is_object())
        .map(|j| {
            let title = first_str(j, &[&["title"], &["job_title"]]).unwrap_or_default();
            let company = first_str(j, &[&["company"], &["company_name"], &["company", "name"]])
                .unwrap_or_else(|| UNKNOWN.to_string());
            let location = str_or_list(j.get("location"), 3)
                .or_else(|| str_or_list(j.get("locations"), 3))
                .unwrap_or_else(|| UNKNOWN.to_string());
            let date = ["date_posted", "posted_date", "date"]
                .iter()
                .map(|k| date_value(j.get(*k)))
                .find(|d| !d.is_empty())
                .unwrap_or_default();
            let id = first_id(j, &[&["id"], &["job_id"]])
                .unwrap_or_else(|| format!("{title}-{company}"));
            NormalizedJob::new(source_id, title, company, location)
                .with_url(first_str(j, &[&["url"], &["apply_url"], &["link"]]).unwrap_or_default())
                .with_date_posted(date)
                .with_external_id(id)
        })
        .collect()
}

/// One HiringCafe search query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiringCafeAdapter {
    query: &'static str,
    search_url: String,
    jobs_url: String,
}

impl HiringCafeAdapter {
    pub fn new(query: &'static str) -> Self {
        Self {
            query,
            search_url: HIRING_CAFE_SEARCH_URL.to_string(),
            jobs_url: HIRING_CAFE_JOBS_URL.to_string(),
        }
    }

    /// Points the search POST and the listing GET fallback at other hosts.
    pub fn with_endpoints(mut self, search_url: impl Into<String>, jobs_url: impl Into<String>) -> Self {
        self.search_url = search_url.into();
        self.jobs_url = jobs_url.into();
        self
    }

    pub fn parse(body: &[u8]) -> Vec<NormalizedJob> {
        parse_listing("hiringcafe", body)
    }
}

#[async_trait]
impl SourceAdapter for HiringCafeAdapter {
    fn source_id(&self) -> &str {
        "hiringcafe"
    }

    fn describe(&self) -> String {
        format!("HiringCafe ({})", self.query)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let payload = json!({
            "query": self.query,
            "location": "United States",
            "limit": PAGE_LIMIT,
        });
        let resp = match http.post_json(&self.search_url, &payload).await {
            Ok(resp) => resp,
            // The search endpoint rejects some clients outright; the listing endpoint does not.
            Err(FetchError::HttpStatus { status, .. }) => {
                debug!(query = self.query, status, "hiringcafe search refused; using listing endpoint");
                http.get(
                    &self.jobs_url,
                    &[
                        ("q", self.query.to_string()),
                        ("location", "US".to_string()),
                        ("limit", PAGE_LIMIT.to_string()),
                    ],
                )
                .await?
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self::parse(&resp.body))
    }
}

/// One Jobright search query, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobrightAdapter {
    query: &'static str,
}

impl JobrightAdapter {
    pub fn new(query: &'static str) -> Self {
        Self { query }
    }

    pub fn parse(body: &[u8]) -> Vec<NormalizedJob> {
        parse_listing("jobright", body)
    }
}

#[async_trait]
impl SourceAdapter for JobrightAdapter {
    fn source_id(&self) -> &str {
        "jobright"
    }

    fn describe(&self) -> String {
        format!("Jobright ({})", self.query)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let resp = http
            .get(
                JOBRIGHT_SEARCH_URL,
                &[
                    ("q", self.query.to_string()),
                    ("location", "United States".to_string()),
                    ("limit", PAGE_LIMIT.to_string()),
                    ("sort", "date".to_string()),
                ],
            )
            .await?;
        Ok(Self::parse(&resp.body))
    }
}

/// Y Combinator "Work at a Startup" full-time roles from its Algolia index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YcWorkAtStartupAdapter {
    credentials: AlgoliaCredentials,
}

impl YcWorkAtStartupAdapter {
    pub fn new(credentials: AlgoliaCredentials) -> Self {
        Self { credentials }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://{}-dsn.algolia.net/1/indexes/{YC_INDEX}",
            self.credentials.app_id.to_lowercase()
        )
    }

    pub fn parse(body: &[u8]) -> Vec<NormalizedJob> {
        let Some(value) = parse_json_body(body, "yc-startup") else {
            return Vec::new();
        };
        let Some(hits) = value.get("hits").and_then(JsonValue::as_array) else {
            return shape_mismatch("yc-startup", "missing hits array");
        };
        hits.iter()
            .filter(|h| h.is_object())
            .map(|hit| {
                let title = first_str(hit, &[&["title"]]).unwrap_or_default();
                let company = first_str(hit, &[&["company_name"], &["startup_name"]])
                    .unwrap_or_else(|| UNKNOWN.to_string());
                let location = str_or_list(hit.get("pretty_location"), usize::MAX)
                    .or_else(|| str_or_list(hit.get("location"), usize::MAX))
                    .unwrap_or_else(|| UNKNOWN.to_string());
                let url = first_str(hit, &[&["url"]])
                    .or_else(|| {
                        first_str(hit, &[&["slug"]])
                            .map(|slug| format!("https://www.workatastartup.com/jobs/{slug}"))
                    })
                    .unwrap_or_default();
                let id = first_id(hit, &[&["objectID"], &["id"]])
                    .unwrap_or_else(|| format!("{company}-{title}"));
                NormalizedJob::new("yc-startup", title, company, location)
                    .with_url(url)
                    .with_date_posted(date_value(hit.get("created_at")))
                    .with_external_id(id)
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for YcWorkAtStartupAdapter {
    fn source_id(&self) -> &str {
        "yc-startup"
    }

    fn describe(&self) -> String {
        "Y Combinator Work at a Startup".to_string()
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let resp = http
            .get(
                &self.endpoint(),
                &[
                    ("query", String::new()),
                    ("hitsPerPage", "100".to_string()),
                    ("filters", "role_type:FullTime".to_string()),
                    ("x-algolia-application-id", self.credentials.app_id.clone()),
                    ("x-algolia-api-key", self.credentials.api_key.clone()),
                ],
            )
            .await?;
        Ok(Self::parse(&resp.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_accepts_alternate_field_names() {
        let body = br#"{"results": [
            {"job_title": "ML Engineer", "company_name": "Gamma", "location": "Denver, CO",
             "apply_url": "https://gamma.example/apply", "posted_date": "2026-10-18", "job_id": 55},
            {"title": "Data Scientist", "company": {"name": "Delta"}, "locations": ["NYC", "Remote"]}
        ]}"#;
        let jobs = HiringCafeAdapter::parse(body);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].title, "ML Engineer");
        assert_eq!(jobs[0].url, "https://gamma.example/apply");
        assert_eq!(jobs[0].external_id.as_deref(), Some("55"));
        assert_eq!(jobs[1].company, "Delta");
        assert_eq!(jobs[1].location, "NYC, Remote");
        assert_eq!(jobs[1].external_id.as_deref(), Some("Data Scientist-Delta"));
    }

    #[test]
    fn listing_accepts_bare_lists_and_data_key() {
        let bare = br#"[{"title": "SWE", "company": "Eps", "url": "https://eps.example/1"}]"#;
        let data = br#"{"data": [{"title": "SWE", "company": "Eps"}]}"#;
        assert_eq!(JobrightAdapter::parse(bare).len(), 1);
        assert_eq!(JobrightAdapter::parse(data)[0].source_id, "jobright");
        assert!(JobrightAdapter::parse(br#"{"data": {"items": []}}"#).is_empty());
    }

    #[test]
    fn yc_hits_build_urls_from_slugs() {
        let body = br#"{"hits": [
            {"objectID": "abc", "title": "Founding Engineer", "company_name": "Zeta",
             "pretty_location": ["San Francisco, CA", "Remote (US)"], "slug": "zeta-founding", "created_at": 1760700000}
        ]}"#;
        let jobs = YcWorkAtStartupAdapter::parse(body);
        assert_eq!(jobs[0].url, "https://www.workatastartup.com/jobs/zeta-founding");
        assert_eq!(jobs[0].location, "San Francisco, CA, Remote (US)");
        assert!(jobs[0].date_posted.starts_with("2025-10-17"));
    }

    #[test]
    fn yc_endpoint_uses_lowercase_application_id() {
        let adapter = YcWorkAtStartupAdapter::new(AlgoliaCredentials {
            app_id: "ABC123".into(),
            api_key: "key".into(),
        });
        assert_eq!(
            adapter.endpoint(),
            "https://abc123-dsn.algolia.net/1/indexes/WaaSJobs_production"
        );
    }
}
