//! Public job boards: JSON APIs, RSS feeds and the Hacker News hiring thread.

use async_trait::async_trait;
use jobclaw_core::NormalizedJob;
use jobclaw_storage::HttpFetcher;
use scraper::Html;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::extract::{first_id, first_str, REMOTE, UNKNOWN};
use crate::{parse_json_body, shape_mismatch, AdapterError, SourceAdapter};

const REMOTE_OK_URL: &str = "https://remoteok.com/api";
const REMOTIVE_URL: &str = "https://remotive.com/api/remote-jobs";
const DICE_FEED_URL: &str = "https://www.dice.com/rss/interface/feed.xml";
const HN_SEARCH_URL: &str = "https://hn.algolia.com/api/v1/search_by_date";
const HN_ITEMS_URL: &str = "https://hn.algolia.com/api/v1/items";
const HN_MAX_COMMENTS: usize = 200;

pub const WE_WORK_REMOTELY_FEEDS: [&str; 2] = [
    "https://weworkremotely.com/categories/remote-programming-jobs.rss",
    "https://weworkremotely.com/categories/remote-devops-and-sysadmin-jobs.rss",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteOkAdapter;

impl RemoteOkAdapter {
    /// The first element of the payload is a legal notice without a `slug`.
    pub fn parse(body: &[u8]) -> Vec<NormalizedJob> {
        let Some(value) = parse_json_body(body, "remoteok") else {
            return Vec::new();
        };
        let Some(items) = value.as_array() else {
            return shape_mismatch("remoteok", "expected a list");
        };
        items
            .iter()
            .filter(|j| j.get("slug").is_some())
            .map(|j| {
                let slug = first_str(j, &[&["slug"]]).unwrap_or_default();
                let url = first_str(j, &[&["url"]])
                    .unwrap_or_else(|| format!("https://remoteok.com/remote-jobs/{slug}"));
                NormalizedJob::new(
                    "remoteok",
                    first_str(j, &[&["position"]]).unwrap_or_default(),
                    first_str(j, &[&["company"]]).unwrap_or_else(|| UNKNOWN.to_string()),
                    first_str(j, &[&["location"]]).unwrap_or_else(|| REMOTE.to_string()),
                )
                .with_url(url)
                .with_date_posted(first_str(j, &[&["date"]]).unwrap_or_default())
                .with_external_id(first_id(j, &[&["id"], &["slug"]]).unwrap_or_default())
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for RemoteOkAdapter {
    fn source_id(&self) -> &str {
        "remoteok"
    }

    fn describe(&self) -> String {
        "RemoteOK".to_string()
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let resp = http.get(REMOTE_OK_URL, &[]).await?;
        Ok(Self::parse(&resp.body))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemotiveAdapter;

impl RemotiveAdapter {
    pub fn parse(body: &[u8]) -> Vec<NormalizedJob> {
        let Some(value) = parse_json_body(body, "remotive") else {
            return Vec::new();
        };
        let Some(items) = value.get("jobs").and_then(JsonValue::as_array) else {
            return shape_mismatch("remotive", "missing jobs array");
        };
        items
            .iter()
            .filter(|j| j.is_object())
            .map(|j| {
                NormalizedJob::new(
                    "remotive",
                    first_str(j, &[&["title"]]).unwrap_or_default(),
                    first_str(j, &[&["company_name"]]).unwrap_or_else(|| UNKNOWN.to_string()),
                    first_str(j, &[&["candidate_required_location"]])
                        .unwrap_or_else(|| REMOTE.to_string()),
                )
                .with_url(first_str(j, &[&["url"]]).unwrap_or_default())
                .with_date_posted(first_str(j, &[&["publication_date"]]).unwrap_or_default())
                .with_external_id(first_id(j, &[&["id"]]).unwrap_or_default())
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for RemotiveAdapter {
    fn source_id(&self) -> &str {
        "remotive"
    }

    fn describe(&self) -> String {
        "Remotive".to_string()
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let resp = http.get(REMOTIVE_URL, &[]).await?;
        Ok(Self::parse(&resp.body))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FeedItem {
    pub title: String,
    pub link: String,
    pub published: String,
}

/// RSS/Atom entries; an unparsable document is zero entries.
pub(crate) fn feed_items(body: &[u8], source_id: &str) -> Vec<FeedItem> {
    let feed = match feed_rs::parser::parse(body) {
        Ok(feed) => feed,
        Err(err) => {
            debug!(source_id, error = %err, "feed did not parse; treating as zero results");
            return Vec::new();
        }
    };
    feed.entries
        .into_iter()
        .map(|entry| FeedItem {
            title: entry
                .title
                .map(|t| t.content.trim().to_string())
                .unwrap_or_default(),
            link: entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default(),
            published: entry
                .published
                .or(entry.updated)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
        })
        .collect()
}

/// One We Work Remotely category feed. Item titles read `Company: Title`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeWorkRemotelyAdapter {
    feed_url: &'static str,
}

impl WeWorkRemotelyAdapter {
    pub fn new(feed_url: &'static str) -> Self {
        Self { feed_url }
    }

    pub fn parse(body: &[u8]) -> Vec<NormalizedJob> {
        feed_items(body, "weworkremotely")
            .into_iter()
            .map(|item| {
                let (company, title) = match item.title.split_once(": ") {
                    Some((company, title)) => (company.trim().to_string(), title.trim().to_string()),
                    None => (UNKNOWN.to_string(), item.title.clone()),
                };
                let external_id = if item.link.is_empty() { title.clone() } else { item.link.clone() };
                NormalizedJob::new("weworkremotely", title, company, REMOTE)
                    .with_url(item.link)
                    .with_date_posted(item.published)
                    .with_external_id(external_id)
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for WeWorkRemotelyAdapter {
    fn source_id(&self) -> &str {
        "weworkremotely"
    }

    fn describe(&self) -> String {
        format!("WeWorkRemotely ({})", self.feed_url)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let resp = http.get(self.feed_url, &[]).await?;
        Ok(Self::parse(&resp.body))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiceAdapter;

impl DiceAdapter {
    pub fn parse(body: &[u8]) -> Vec<NormalizedJob> {
        feed_items(body, "dice")
            .into_iter()
            .map(|item| {
                NormalizedJob::new("dice", item.title, UNKNOWN, UNKNOWN)
                    .with_external_id(item.link.clone())
                    .with_url(item.link)
                    .with_date_posted(item.published)
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for DiceAdapter {
    fn source_id(&self) -> &str {
        "dice"
    }

    fn describe(&self) -> String {
        "Dice".to_string()
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let resp = http.get(DICE_FEED_URL, &[]).await?;
        Ok(Self::parse(&resp.body))
    }
}

/// Top-level comments of the latest "Ask HN: Who is hiring?" thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct HackerNewsAdapter;

impl HackerNewsAdapter {
    /// Object id of the newest thread whose title mentions "who is hiring".
    pub fn find_thread(search_body: &[u8]) -> Option<String> {
        let value = parse_json_body(search_body, "hackernews")?;
        value
            .get("hits")?
            .as_array()?
            .iter()
            .find(|hit| {
                first_str(hit, &[&["title"]])
                    .is_some_and(|t| t.to_lowercase().contains("who is hiring"))
            })
            .and_then(|hit| first_id(hit, &[&["objectID"]]))
    }

    pub fn parse_thread(body: &[u8]) -> Vec<NormalizedJob> {
        let Some(value) = parse_json_body(body, "hackernews") else {
            return Vec::new();
        };
        let Some(children) = value.get("children").and_then(JsonValue::as_array) else {
            return shape_mismatch("hackernews", "missing children array");
        };
        children
            .iter()
            .take(HN_MAX_COMMENTS)
            .filter_map(|child| {
                let text = first_str(child, &[&["text"]])?;
                let headline = comment_headline(&text);
                let parts = headline.split('|').map(str::trim).collect::<Vec<_>>();
                if parts.len() < 2 {
                    return None;
                }
                let id = first_id(child, &[&["id"]]).unwrap_or_default();
                let location = parts
                    .get(2)
                    .filter(|p| !p.is_empty())
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| UNKNOWN.to_string());
                Some(
                    NormalizedJob::new("hackernews", parts[1], parts[0], location)
                        .with_url(format!("https://news.ycombinator.com/item?id={id}"))
                        .with_date_posted(first_str(child, &[&["created_at"]]).unwrap_or_default())
                        .with_external_id(id),
                )
            })
            .collect()
    }
}

/// First line of an HN comment with markup removed and entities decoded.
fn comment_headline(html: &str) -> String {
    let first = html
        .split("<p>")
        .next()
        .unwrap_or_default()
        .split('\n')
        .next()
        .unwrap_or_default();
    Html::parse_fragment(first)
        .root_element()
        .text()
        .collect::<String>()
        .trim()
        .to_string()
}

#[async_trait]
impl SourceAdapter for HackerNewsAdapter {
    fn source_id(&self) -> &str {
        "hackernews"
    }

    fn describe(&self) -> String {
        "Hacker News: Who is hiring".to_string()
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<NormalizedJob>, AdapterError> {
        let search = http
            .get(
                HN_SEARCH_URL,
                &[
                    ("query", "Ask HN: Who is hiring?".to_string()),
                    ("tags", "story,ask_hn".to_string()),
                    ("hitsPerPage", "10".to_string()),
                ],
            )
            .await?;
        let Some(thread_id) = Self::find_thread(&search.body) else {
            debug!("no hiring thread found");
            return Ok(Vec::new());
        };
        let thread = http.get(&format!("{HN_ITEMS_URL}/{thread_id}"), &[]).await?;
        Ok(Self::parse_thread(&thread.body))
    }
}
