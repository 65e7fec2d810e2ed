//! GitHub repositories that track new-grad and internship openings.

use async_trait::async_trait;
use jobclaw_core::NormalizedJob;
use jobclaw_storage::HttpFetcher;
use serde_json::Value as JsonValue;

use crate::extract::{date_value, first_id, first_str, str_or_list, UNKNOWN};
use crate::markdown::parse_markdown_table;
use crate::{parse_json_body, shape_mismatch, AdapterError, SourceAdapter};

const MAX_LOCATIONS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: &'static str,
    pub repo: &'static str,
    pub branch: &'static str,
    pub path: &'static str,
}

impl RepoRef {
    pub fn raw_url(&self) -> String {
        format!(
            "https://raw.githubusercontent.com/{}/{}/{}/{}",
            self.owner, self.repo, self.branch, self.path
        )
    }
}

/// A SimplifyJobs repository's `listings.json` backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimplifyRepoAdapter {
    repo: RepoRef,
    source_id: String,
}

impl SimplifyRepoAdapter {
    pub fn new(repo: RepoRef, label: &str) -> Self {
        Self {
            repo,
            source_id: format!("github-{label}"),
        }
    }

    pub fn parse(&self, body: &[u8]) -> Vec<NormalizedJob> {
        let Some(value) = parse_json_body(body, &self.source_id) else {
            return Vec::new();
        };
        let Some(items) = value.as_array() else {
            return shape_mismatch(&self.source_id, "expected a list of listings");
        };
        items
            .iter()
            .filter(|j| j.is_object())
            .filter(|j| j.get("is_visible").and_then(JsonValue::as_bool) != Some(false))
            .filter(|j| j.get("active").and_then(JsonValue::as_bool) != Some(false))
            .map(|j| {
                let title = first_str(j, &[&["title"]]).unwrap_or_default();
                let company =
                    first_str(j, &[&["company_name"]]).unwrap_or_else(|| UNKNOWN.to_string());
                let id = first_id(j, &[&["id"]]);
                let url = first_str(j, &[&["url"]])
                    .or_else(|| id.as_ref().map(|id| format!("https://simplify.jobs/p/{id}")))
                    .unwrap_or_default();
                let external_id = id.unwrap_or_else(|| format!("{company}-{title}"));
                NormalizedJob::new(
                    self.source_id.as_str(),
                    title,
                    company,
                    str_or_list(j.get("locations"), MAX_LOCATIONS)
                        .unwrap_or_else(|| UNKNOWN.to_string()),
                )
                .with_url(url)
                .with_date_posted(date_value(j.get("date_posted")))
                .with_external_id(external_id)
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for SimplifyRepoAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn describe(&self) -> String {
        format!("GitHub {}/{}", self.repo.owner, self.repo.repo)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let resp = http.get(&self.repo.raw_url(), &[]).await?;
        Ok(self.parse(&resp.body))
    }
}

/// A repository whose README carries the listings as a markdown table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownRepoAdapter {
    repo: RepoRef,
    source_id: String,
}

impl MarkdownRepoAdapter {
    pub fn new(repo: RepoRef, label: &str) -> Self {
        Self {
            repo,
            source_id: format!("github-{label}"),
        }
    }
}

#[async_trait]
impl SourceAdapter for MarkdownRepoAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn describe(&self) -> String {
        format!("GitHub {}/{}", self.repo.owner, self.repo.repo)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let resp = http.get(&self.repo.raw_url(), &[]).await?;
        Ok(parse_markdown_table(&resp.text(), &self.source_id))
    }
}

pub fn simplify_repos() -> Vec<SimplifyRepoAdapter> {
    vec![
        SimplifyRepoAdapter::new(
            RepoRef {
                owner: "SimplifyJobs",
                repo: "New-Grad-Positions",
                branch: "dev",
                path: ".github/scripts/listings.json",
            },
            "new-grad",
        ),
        SimplifyRepoAdapter::new(
            RepoRef {
                owner: "SimplifyJobs",
                repo: "Summer2026-Internships",
                branch: "dev",
                path: ".github/scripts/listings.json",
            },
            "internship",
        ),
    ]
}

pub fn markdown_repos() -> Vec<MarkdownRepoAdapter> {
    vec![
        MarkdownRepoAdapter::new(
            RepoRef {
                owner: "speedyapply",
                repo: "2026-AI-College-Jobs",
                branch: "main",
                path: "README.md",
            },
            "ai-newgrad",
        ),
        MarkdownRepoAdapter::new(
            RepoRef {
                owner: "zapplyjobs",
                repo: "New-Grad-Software-Engineering-Jobs-2026",
                branch: "main",
                path: "README.md",
            },
            "swe-newgrad",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simplify_skips_hidden_and_inactive_listings() {
        let adapter = simplify_repos().remove(0);
        let body = br#"[
            {"id": "a1", "company_name": "Acme", "title": "Software Engineer I",
             "locations": ["NYC", "SF", "Austin, TX", "Remote"], "date_posted": 1760700000, "url": ""},
            {"id": "a2", "company_name": "Acme", "title": "Hidden", "is_visible": false},
            {"id": "a3", "company_name": "Acme", "title": "Closed", "active": false},
            {"company_name": "Beta", "title": "New Grad SWE", "locations": []}
        ]"#;
        let jobs = adapter.parse(body);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].source_id, "github-new-grad");
        assert_eq!(jobs[0].location, "NYC, SF, Austin, TX");
        assert_eq!(jobs[0].url, "https://simplify.jobs/p/a1");
        assert!(jobs[0].date_posted.starts_with("2025-10-17T"));
        assert_eq!(jobs[1].location, "Unknown");
        assert_eq!(jobs[1].external_id.as_deref(), Some("Beta-New Grad SWE"));
    }

    #[test]
    fn repo_urls_point_at_raw_content() {
        let repos = markdown_repos();
        assert_eq!(repos[0].source_id(), "github-ai-newgrad");
        assert_eq!(
            repos[1].repo.raw_url(),
            "https://raw.githubusercontent.com/zapplyjobs/New-Grad-Software-Engineering-Jobs-2026/main/README.md"
        );
    }
}
