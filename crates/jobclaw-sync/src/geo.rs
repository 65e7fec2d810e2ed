//! US-location filter. Biased toward inclusion: only an explicit exclude
//! pattern rejects a record.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::ConfigError;

/// 50 states, DC and the inhabited territories.
const US_STATE_CODES: [&str; 56] = [
    "al", "ak", "az", "ar", "ca", "co", "ct", "de", "fl", "ga", "hi", "id", "il", "in", "ia",
    "ks", "ky", "la", "me", "md", "ma", "mi", "mn", "ms", "mo", "mt", "ne", "nv", "nh", "nj",
    "nm", "ny", "nc", "nd", "oh", "ok", "or", "pa", "ri", "sc", "sd", "tn", "tx", "ut", "vt",
    "va", "wa", "wv", "wi", "wy", "dc", "pr", "gu", "vi", "as", "mp",
];

const PLACEHOLDERS: [&str; 4] = ["unknown", "n/a", "various", "multiple"];

static RE_TWO_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z]{2}\b").expect("valid state code regex"));

#[derive(Debug, Clone, Default, Deserialize)]
struct LocationsFile {
    #[serde(default)]
    include_patterns: Vec<String>,
    #[serde(default)]
    exclude_patterns: Vec<String>,
}

/// Which rule decided a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoDecision {
    Placeholder,
    Excluded,
    IncludePattern,
    StateCode,
    Default,
}

impl GeoDecision {
    pub fn admits(self) -> bool {
        self != GeoDecision::Excluded
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl LocationFilter {
    pub fn from_patterns<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let lower = |p: &str| p.trim().to_lowercase();
        Self {
            include: include
                .into_iter()
                .map(|p| lower(p.as_ref()))
                .filter(|p| p.len() > 2)
                .collect(),
            exclude: exclude
                .into_iter()
                .map(|p| lower(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// A missing file gives a filter with no patterns.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no location patterns file; admitting every location");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let file: LocationsFile = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_patterns(file.include_patterns, file.exclude_patterns))
    }

    pub fn classify(&self, location: &str) -> GeoDecision {
        let loc = location.trim().to_lowercase();
        if loc.is_empty() || PLACEHOLDERS.contains(&loc.as_str()) {
            return GeoDecision::Placeholder;
        }
        if self.exclude.iter().any(|p| loc.contains(p.as_str())) {
            return GeoDecision::Excluded;
        }
        if self.include.iter().any(|p| loc.contains(p.as_str())) {
            return GeoDecision::IncludePattern;
        }
        let has_state_code = RE_TWO_LETTER
            .find_iter(location)
            .any(|m| US_STATE_CODES.contains(&m.as_str().to_lowercase().as_str()));
        if has_state_code {
            return GeoDecision::StateCode;
        }
        GeoDecision::Default
    }

    pub fn admits(&self, location: &str) -> bool {
        self.classify(location).admits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> LocationFilter {
        LocationFilter::from_patterns(
            ["United States", "Remote", "New York", "US"],
            ["london", "toronto", "india", "berlin"],
        )
    }

    #[test]
    fn placeholders_and_blank_are_admitted() {
        let f = filter();
        for loc in ["", "  ", "Unknown", "N/A", "various", "Multiple"] {
            assert_eq!(f.classify(loc), GeoDecision::Placeholder, "{loc:?}");
        }
    }

    #[test]
    fn exclude_wins_over_include() {
        let f = filter();
        assert_eq!(f.classify("Remote - India"), GeoDecision::Excluded);
        assert!(!f.admits("London, UK"));
    }

    #[test]
    fn short_include_patterns_are_ignored() {
        let f = filter();
        assert_eq!(f.classify("Remote"), GeoDecision::IncludePattern);
        // "us" is too short to be an include pattern, and not a state code
        assert_eq!(f.classify("Lusaka"), GeoDecision::Default);
    }

    #[test]
    fn standalone_state_codes_match() {
        let f = filter();
        assert_eq!(f.classify("Austin, TX"), GeoDecision::StateCode);
        assert_eq!(f.classify("San Juan, PR"), GeoDecision::StateCode);
        assert_eq!(f.classify("Texas City"), GeoDecision::Default);
    }

    #[test]
    fn anything_not_excluded_is_admitted() {
        let f = filter();
        for loc in ["Mars Base One", "Hybrid", "3 Locations", "Zürich?"] {
            assert!(f.admits(loc), "{loc:?}");
        }
    }

    #[test]
    fn missing_file_means_no_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let f = LocationFilter::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(f, LocationFilter::default());
        assert!(f.admits("London, UK"));
    }
}
