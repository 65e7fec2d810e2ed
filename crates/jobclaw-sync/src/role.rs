//! Title relevance: keyword -> category taxonomy.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;

use crate::ConfigError;

#[derive(Debug, Clone, Deserialize)]
struct KeywordsFile {
    categories: Vec<CategoryRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct CategoryRule {
    category: String,
    keywords: Vec<String>,
}

/// Immutable keyword table. Keywords are stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTaxonomy {
    rules: Vec<(String, String)>,
}

impl RoleTaxonomy {
    pub fn from_pairs<K, C>(pairs: impl IntoIterator<Item = (K, C)>) -> Self
    where
        K: AsRef<str>,
        C: Into<String>,
    {
        let rules = pairs
            .into_iter()
            .map(|(kw, cat)| (kw.as_ref().trim().to_lowercase(), cat.into()))
            .filter(|(kw, _)| !kw.is_empty())
            .collect();
        Self { rules }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: KeywordsFile = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let taxonomy = Self::from_pairs(file.categories.into_iter().flat_map(|rule| {
            let category = rule.category;
            rule.keywords
                .into_iter()
                .map(move |kw| (kw, category.clone()))
        }));
        if taxonomy.is_empty() {
            return Err(ConfigError::EmptyTaxonomy {
                path: path.to_path_buf(),
            });
        }
        Ok(taxonomy)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn categories(&self) -> BTreeSet<&str> {
        self.rules.iter().map(|(_, cat)| cat.as_str()).collect()
    }

    /// Every category with at least one keyword occurring in `title`.
    pub fn categories_for(&self, title: &str) -> BTreeSet<String> {
        let title = title.to_lowercase();
        if title.trim().is_empty() {
            return BTreeSet::new();
        }
        self.rules
            .iter()
            .filter(|(kw, _)| title.contains(kw.as_str()))
            .map(|(_, cat)| cat.clone())
            .collect()
    }
}
