//! Job tables embedded in community README files.
//!
//! Column roles are guessed from the header row, so the parser copes with
//! repositories that reorder or rename columns.

use std::sync::LazyLock;

use jobclaw_core::NormalizedJob;
use regex::Regex;

use crate::extract::UNKNOWN;

const DEFAULT_TITLE: &str = "New Grad Position";
const INHERIT_COMPANY: &str = "↳";

static RE_MD_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)]+)\)").expect("valid markdown link regex"));
static RE_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("valid href regex"));
static RE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid html tag regex"));

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Columns {
    company: Option<usize>,
    title: Option<usize>,
    location: Option<usize>,
    url: Option<usize>,
    date: Option<usize>,
}

impl Columns {
    /// Each header cell is claimed by the first role whose keywords it contains.
    fn detect(cells: &[&str]) -> Option<Self> {
        let mut cols = Columns::default();
        for (i, cell) in cells.iter().enumerate() {
            let cl = cell.to_lowercase();
            let has = |keys: &[&str]| keys.iter().any(|k| cl.contains(k));
            if has(&["company", "employer"]) {
                cols.company = Some(i);
            } else if has(&["role", "title", "position"]) {
                cols.title = Some(i);
            } else if has(&["location", "city"]) {
                cols.location = Some(i);
            } else if has(&["link", "url", "apply", "application"]) {
                cols.url = Some(i);
            } else if has(&["date", "posted", "added"]) {
                cols.date = Some(i);
            }
        }
        (cols.company.is_some() || cols.title.is_some()).then_some(cols)
    }
}

fn is_separator(cells: &[&str]) -> bool {
    cells
        .iter()
        .all(|c| c.chars().all(|ch| matches!(ch, '-' | ':' | ' ')))
}

/// Link text instead of links, no HTML tags, no bold markers.
pub fn clean_text(cell: &str) -> String {
    let text = RE_MD_LINK.replace_all(cell, "$1");
    let text = RE_TAG.replace_all(&text, "");
    text.replace("**", "").trim().to_string()
}

fn link_in(cell: &str) -> Option<String> {
    RE_MD_LINK
        .captures(cell)
        .map(|c| c[2].trim().to_string())
        .or_else(|| RE_HREF.captures(cell).map(|c| c[1].trim().to_string()))
}

fn row_url(cells: &[&str], cols: &Columns) -> String {
    if let Some(url) = cols.url.and_then(|i| cells.get(i)).and_then(|c| link_in(c)) {
        return url;
    }
    cells
        .iter()
        .filter_map(|c| link_in(c))
        .find(|url| url.starts_with("http"))
        .unwrap_or_default()
}

pub fn parse_markdown_table(markdown: &str, source_id: &str) -> Vec<NormalizedJob> {
    let mut jobs = Vec::new();
    let mut columns: Option<Columns> = None;
    let mut last_company: Option<String> = None;

    for raw in markdown.lines() {
        let line = raw.trim();
        if !line.starts_with('|') {
            columns = None;
            last_company = None;
            continue;
        }

        let inner = line.trim_start_matches('|');
        let inner = inner.strip_suffix('|').unwrap_or(inner);
        let cells = inner.split('|').map(str::trim).collect::<Vec<_>>();

        if is_separator(&cells) {
            continue;
        }

        let Some(cols) = columns else {
            columns = Columns::detect(&cells);
            continue;
        };

        if cells.len() < 2 {
            continue;
        }
        if line.contains("~~") || line.contains('🔒') {
            continue;
        }

        let cell = |idx: Option<usize>| idx.and_then(|i| cells.get(i)).map(|c| clean_text(c));

        let mut company = cell(cols.company).unwrap_or_default();
        if company == INHERIT_COMPANY {
            company = last_company.clone().unwrap_or_default();
        }
        let title = cell(cols.title).unwrap_or_default();
        if company.is_empty() && title.is_empty() {
            continue;
        }
        let location = cell(cols.location)
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());
        let date = cell(cols.date).unwrap_or_default();
        let url = row_url(&cells, &cols);
        let external_id = format!("{company}-{title}-{source_id}");

        if !company.is_empty() {
            last_company = Some(company.clone());
        }

        let title = if title.is_empty() { DEFAULT_TITLE.to_string() } else { title };
        let company = if company.is_empty() { UNKNOWN.to_string() } else { company };

        jobs.push(
            NormalizedJob::new(source_id, title, company, location)
                .with_url(url)
                .with_date_posted(date)
                .with_external_id(external_id),
        );
    }

    jobs
}

#[cfg(test)]
mod tests {
    use super::*;

    const README: &str = "\
# 2026 New Grad Roles

| Company | Role | Location | Application | Date Posted |
|---------|------|----------|-------------|-------------|
| **[Acme](https://acme.example)** | Software Engineer, New Grad | San Francisco, CA | [Apply](https://acme.example/jobs/1) | Oct 18 |
| ↳ | Machine Learning Engineer | Remote in USA | <a href=\"https://acme.example/jobs/2\"><img src=\"apply.png\"></a> | Oct 18 |
| Beta | ~~Data Analyst~~ | Austin, TX | [Apply](https://beta.example/1) | Oct 17 |
| Gamma | 🔒 Backend Engineer | Seattle, WA | [Apply](https://gamma.example/1) | Oct 16 |
| Delta |  |  |  | Oct 15 |

Some prose between tables.

| Employer | Position |
|:--|:--|
| Zeta | [AI Engineer](https://zeta.example/ai) |
";

    #[test]
    fn parses_rows_and_skips_closed_ones() {
        let jobs = parse_markdown_table(README, "github-swe-newgrad");
        let titles = jobs.iter().map(|j| j.title.as_str()).collect::<Vec<_>>();
        assert_eq!(
            titles,
            vec![
                "Software Engineer, New Grad",
                "Machine Learning Engineer",
                "New Grad Position",
                "AI Engineer"
            ]
        );

        assert_eq!(jobs[0].company, "Acme");
        assert_eq!(jobs[0].url, "https://acme.example/jobs/1");
        assert_eq!(jobs[0].date_posted, "Oct 18");
        assert_eq!(jobs[0].source_id, "github-swe-newgrad");

        assert_eq!(jobs[1].company, "Acme");
        assert_eq!(jobs[1].url, "https://acme.example/jobs/2");

        assert_eq!(jobs[2].company, "Delta");
        assert_eq!(jobs[2].location, "Unknown");
        assert_eq!(jobs[2].url, "");
    }

    #[test]
    fn url_falls_back_to_any_http_link() {
        let jobs = parse_markdown_table(README, "github-ai-newgrad");
        let zeta = jobs.iter().find(|j| j.company == "Zeta").expect("zeta row");
        assert_eq!(zeta.url, "https://zeta.example/ai");
        assert_eq!(zeta.location, "Unknown");
    }

    #[test]
    fn tables_without_company_or_title_columns_are_ignored() {
        let md = "| Name | Stars |\n|---|---|\n| rust | 100 |\n";
        assert!(parse_markdown_table(md, "github-x").is_empty());
        assert!(parse_markdown_table("", "github-x").is_empty());
    }

    #[test]
    fn clean_text_strips_markup() {
        assert_eq!(clean_text("**[Acme](https://a.example)**"), "Acme");
        assert_eq!(clean_text("<b>Remote</b> in US"), "Remote in US");
    }
}
