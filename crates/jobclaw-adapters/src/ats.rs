//! Applicant-tracking-system adapters, one per platform, parameterized by
//! the company slug from the source registry.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use jobclaw_core::NormalizedJob;
use jobclaw_storage::HttpFetcher;
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use crate::extract::{
    at, date_value, first_id, first_str, join_parts, list_under, str_or_list, UNKNOWN,
};
use crate::{parse_json_body, shape_mismatch, AdapterError, SourceAdapter};

macro_rules! ats_adapter {
    ($name:ident, $source_id:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            company: String,
            slug: String,
        }

        impl $name {
            pub fn new(company: impl Into<String>, slug: impl Into<String>) -> Self {
                Self {
                    company: company.into(),
                    slug: slug.into(),
                }
            }

            fn job(&self, title: Option<String>, location: Option<String>) -> NormalizedJob {
                NormalizedJob::new(
                    $source_id,
                    title.unwrap_or_default(),
                    &self.company,
                    location.unwrap_or_else(|| UNKNOWN.to_string()),
                )
            }
        }
    };
}

ats_adapter!(GreenhouseAdapter, "greenhouse");
ats_adapter!(LeverAdapter, "lever");
ats_adapter!(AshbyAdapter, "ashby");
ats_adapter!(SmartRecruitersAdapter, "smartrecruiters");
ats_adapter!(BambooHrAdapter, "bamboohr");
ats_adapter!(WorkdayAdapter, "workday");

// Greenhouse: title <- title; location <- location.name; url <- absolute_url,
// else the public board URL; date <- updated_at, created_at.
impl GreenhouseAdapter {
    fn endpoint(&self) -> String {
        format!("https://boards-api.greenhouse.io/v1/boards/{}/jobs", self.slug)
    }

    pub fn parse(&self, body: &[u8]) -> Vec<NormalizedJob> {
        let Some(value) = parse_json_body(body, "greenhouse") else {
            return Vec::new();
        };
        let Some(items) = value.get("jobs").and_then(JsonValue::as_array) else {
            return shape_mismatch("greenhouse", "missing jobs array");
        };
        items
            .iter()
            .filter(|j| j.is_object())
            .map(|j| {
                let id = first_id(j, &[&["id"]]).unwrap_or_default();
                let url = first_str(j, &[&["absolute_url"]]).unwrap_or_else(|| {
                    format!("https://boards.greenhouse.io/{}/jobs/{id}", self.slug)
                });
                self.job(
                    first_str(j, &[&["title"]]),
                    first_str(j, &[&["location", "name"], &["location"]]),
                )
                .with_url(url)
                .with_date_posted(first_str(j, &[&["updated_at"], &["created_at"]]).unwrap_or_default())
                .with_external_id(id)
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for GreenhouseAdapter {
    fn source_id(&self) -> &str {
        "greenhouse"
    }

    fn describe(&self) -> String {
        format!("{} (greenhouse)", self.company)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let resp = http.get(&self.endpoint(), &[]).await?;
        Ok(self.parse(&resp.body))
    }
}

// Lever: title <- text; location <- categories.location (string or list);
// url <- hostedUrl, applyUrl; date <- createdAt (epoch millis).
impl LeverAdapter {
    fn endpoint(&self) -> String {
        format!("https://api.lever.co/v0/postings/{}", self.slug)
    }

    pub fn parse(&self, body: &[u8]) -> Vec<NormalizedJob> {
        let Some(value) = parse_json_body(body, "lever") else {
            return Vec::new();
        };
        let Some(items) = value.as_array() else {
            return shape_mismatch("lever", "expected a list of postings");
        };
        items
            .iter()
            .filter(|j| j.is_object())
            .map(|j| {
                let location = str_or_list(at(j, &["categories", "location"]), usize::MAX)
                    .or_else(|| str_or_list(at(j, &["categories", "allLocations"]), 3));
                self.job(first_str(j, &[&["text"]]), location)
                    .with_url(first_str(j, &[&["hostedUrl"], &["applyUrl"]]).unwrap_or_default())
                    .with_date_posted(date_value(j.get("createdAt")))
                    .with_external_id(first_id(j, &[&["id"]]).unwrap_or_default())
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for LeverAdapter {
    fn source_id(&self) -> &str {
        "lever"
    }

    fn describe(&self) -> String {
        format!("{} (lever)", self.company)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let resp = http.get(&self.endpoint(), &[]).await?;
        Ok(self.parse(&resp.body))
    }
}

// Ashby: location <- location (string), location.name, locationName;
// url <- jobUrl, applyUrl; date <- publishedAt, publishedDate.
impl AshbyAdapter {
    fn endpoint(&self) -> String {
        format!("https://api.ashbyhq.com/posting-api/job-board/{}", self.slug)
    }

    pub fn parse(&self, body: &[u8]) -> Vec<NormalizedJob> {
        let Some(value) = parse_json_body(body, "ashby") else {
            return Vec::new();
        };
        let Some(items) = value.get("jobs").and_then(JsonValue::as_array) else {
            return shape_mismatch("ashby", "missing jobs array");
        };
        items
            .iter()
            .filter(|j| j.is_object())
            .map(|j| {
                self.job(
                    first_str(j, &[&["title"]]),
                    first_str(j, &[&["location"], &["location", "name"], &["locationName"]]),
                )
                .with_url(first_str(j, &[&["jobUrl"], &["applyUrl"]]).unwrap_or_default())
                .with_date_posted(first_str(j, &[&["publishedAt"], &["publishedDate"]]).unwrap_or_default())
                .with_external_id(first_id(j, &[&["id"]]).unwrap_or_default())
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for AshbyAdapter {
    fn source_id(&self) -> &str {
        "ashby"
    }

    fn describe(&self) -> String {
        format!("{} (ashby)", self.company)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let resp = http.get(&self.endpoint(), &[]).await?;
        Ok(self.parse(&resp.body))
    }
}

// SmartRecruiters: title <- name; location <- location.fullLocation, else
// "city, region, country"; date <- releasedDate.
impl SmartRecruitersAdapter {
    fn endpoint(&self) -> String {
        format!(
            "https://api.smartrecruiters.com/v1/companies/{}/postings",
            self.slug
        )
    }

    pub fn parse(&self, body: &[u8]) -> Vec<NormalizedJob> {
        let Some(value) = parse_json_body(body, "smartrecruiters") else {
            return Vec::new();
        };
        let Some(items) = value.get("content").and_then(JsonValue::as_array) else {
            return shape_mismatch("smartrecruiters", "missing content array");
        };
        items
            .iter()
            .filter(|j| j.is_object())
            .map(|j| {
                let id = first_id(j, &[&["id"]]).unwrap_or_default();
                let location = first_str(j, &[&["location", "fullLocation"]])
                    .or_else(|| join_parts(j.get("location"), &["city", "region", "country"]));
                self.job(first_str(j, &[&["name"]]), location)
                    .with_url(format!("https://jobs.smartrecruiters.com/{}/{id}", self.slug))
                    .with_date_posted(first_str(j, &[&["releasedDate"]]).unwrap_or_default())
                    .with_external_id(id)
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for SmartRecruitersAdapter {
    fn source_id(&self) -> &str {
        "smartrecruiters"
    }

    fn describe(&self) -> String {
        format!("{} (smartrecruiters)", self.company)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let resp = http
            .get(&self.endpoint(), &[("limit", "100".to_string())])
            .await?;
        Ok(self.parse(&resp.body))
    }
}

// BambooHR: title <- jobOpeningName; location <- "location.city, location.state";
// date <- datePosted.
impl BambooHrAdapter {
    fn endpoint(&self) -> String {
        format!("https://{}.bamboohr.com/careers/list", self.slug)
    }

    pub fn parse(&self, body: &[u8]) -> Vec<NormalizedJob> {
        let Some(value) = parse_json_body(body, "bamboohr") else {
            return Vec::new();
        };
        let Some(items) = value.get("result").and_then(JsonValue::as_array) else {
            return shape_mismatch("bamboohr", "missing result array");
        };
        items
            .iter()
            .filter(|j| j.is_object())
            .map(|j| {
                let id = first_id(j, &[&["id"]]).unwrap_or_default();
                self.job(
                    first_str(j, &[&["jobOpeningName"], &["title"]]),
                    join_parts(j.get("location"), &["city", "state"]),
                )
                .with_url(format!("https://{}.bamboohr.com/careers/{id}", self.slug))
                .with_date_posted(first_str(j, &[&["datePosted"]]).unwrap_or_default())
                .with_external_id(id)
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for BambooHrAdapter {
    fn source_id(&self) -> &str {
        "bamboohr"
    }

    fn describe(&self) -> String {
        format!("{} (bamboohr)", self.company)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let resp = http.get(&self.endpoint(), &[]).await?;
        Ok(self.parse(&resp.body))
    }
}

pub const WORKDAY_PAGE_SIZE: usize = 20;
pub const WORKDAY_MAX_PAGES: usize = 10;

/// Parsed Workday slug `tenant:shard:site`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkdayTarget {
    pub tenant: String,
    pub shard: String,
    pub site: String,
}

impl WorkdayTarget {
    pub fn parse(slug: &str) -> Result<Self, AdapterError> {
        let parts = slug.split(':').map(str::trim).collect::<Vec<_>>();
        match parts.as_slice() {
            [tenant, shard, site] if !tenant.is_empty() && !shard.is_empty() && !site.is_empty() => {
                Ok(Self {
                    tenant: tenant.to_string(),
                    shard: shard.to_string(),
                    site: site.to_string(),
                })
            }
            _ => Err(AdapterError::InvalidSlug {
                slug: slug.to_string(),
                reason: "expected tenant:shard:site",
            }),
        }
    }

    pub fn base_url(&self) -> String {
        format!("https://{}.wd{}.myworkdayjobs.com", self.tenant, self.shard)
    }

    pub fn api_url(&self) -> String {
        format!("{}/wday/cxs/{}/{}/jobs", self.base_url(), self.tenant, self.site)
    }
}

// Workday: location <- locationsText; date <- postedOn, else the first
// "posted" bulletFields entry, else a dated one; id <- externalPath, title.
impl WorkdayAdapter {
    pub fn parse_page(&self, target: &WorkdayTarget, page: &JsonValue) -> Vec<NormalizedJob> {
        let Some(items) = page.get("jobPostings").and_then(JsonValue::as_array) else {
            return shape_mismatch("workday", "missing jobPostings array");
        };
        items
            .iter()
            .filter(|j| j.is_object())
            .map(|j| {
                let title = first_str(j, &[&["title"]]);
                let posted = first_str(j, &[&["postedOn"]])
                    .or_else(|| posted_from_bullets(j.get("bulletFields")))
                    .unwrap_or_default();
                let external_path = first_str(j, &[&["externalPath"]]);
                let url = external_path
                    .as_deref()
                    .map(|path| format!("{}/en-US/{}{path}", target.base_url(), target.site))
                    .unwrap_or_default();
                let external_id = external_path.or_else(|| title.clone()).unwrap_or_default();
                self.job(title, first_str(j, &[&["locationsText"]]))
                    .with_url(url)
                    .with_date_posted(posted)
                    .with_external_id(external_id)
            })
            .collect()
    }
}

/// A "Posted ..." bullet wins over any other; a bullet mentioning a year only
/// counts when it is itself a date. Requisition ids never do.
fn posted_from_bullets(bullets: Option<&JsonValue>) -> Option<String> {
    let texts = list_under(bullets?, &[])?
        .iter()
        .filter_map(|bf| match bf {
            JsonValue::String(s) => Some(s.trim().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>();
    texts
        .iter()
        .find(|t| t.to_lowercase().contains("posted"))
        .or_else(|| texts.iter().find(|t| t.contains("20") && is_calendar_date(t)))
        .cloned()
}

fn is_calendar_date(text: &str) -> bool {
    DateTime::parse_from_rfc3339(text).is_ok()
        || ["%Y-%m-%d", "%m/%d/%Y", "%b %d, %Y", "%B %d, %Y"]
            .iter()
            .any(|fmt| NaiveDate::parse_from_str(text, fmt).is_ok())
}

#[async_trait]
impl SourceAdapter for WorkdayAdapter {
    fn source_id(&self) -> &str {
        "workday"
    }

    fn describe(&self) -> String {
        format!("{} (workday)", self.company)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let target = WorkdayTarget::parse(&self.slug)?;
        self.fetch_pages(http, &target, &target.api_url()).await
    }
}

impl WorkdayAdapter {
    /// Pages through the search API at `api_url`, at most
    /// `WORKDAY_MAX_PAGES` requests. Only a first-page failure is an error.
    pub async fn fetch_pages(
        &self,
        http: &HttpFetcher,
        target: &WorkdayTarget,
        api_url: &str,
    ) -> Result<Vec<NormalizedJob>, AdapterError> {
        let mut jobs = Vec::new();
        let mut offset = 0usize;

        for page_index in 0..WORKDAY_MAX_PAGES {
            let body = json!({
                "appliedFacets": {},
                "limit": WORKDAY_PAGE_SIZE,
                "offset": offset,
                "searchText": "",
            });
            let resp = match http.post_json(api_url, &body).await {
                Ok(resp) => resp,
                Err(err) if page_index == 0 => return Err(err.into()),
                Err(err) => {
                    warn!(company = %self.company, page_index, error = %err, "workday pagination stopped early");
                    break;
                }
            };
            let Some(page) = parse_json_body(&resp.body, "workday") else {
                break;
            };
            let postings = self.parse_page(target, &page);
            if postings.is_empty() {
                break;
            }
            jobs.extend(postings);

            let total = page.get("total").and_then(JsonValue::as_u64).unwrap_or(0) as usize;
            offset += WORKDAY_PAGE_SIZE;
            if offset >= total {
                break;
            }
        }

        Ok(jobs)
    }
}
