use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use url::{Position, Url};

/// URL patterns eligible for rewriting even when not locally retrievable.
///
/// Patterns are globs over the URL without query or fragment, matched
/// case-insensitively: `https://cdn.example.com/*`, `*://*.example.org/img/*`.
#[derive(Debug, Clone)]
pub struct AllowList {
    patterns: Vec<String>,
    set: GlobSet,
}

impl AllowList {
    pub fn new<I, S>(patterns: I) -> Result<Self, globset::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
            kept.push(pattern.to_string());
        }
        Ok(Self {
            patterns: kept,
            set: builder.build()?,
        })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    pub fn matches(&self, url: &Url) -> bool {
        !self.patterns.is_empty() && self.set.is_match(&url[..Position::AfterPath])
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
