//! Explicit map from configuration key to filter constructor.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::filters::{
    BaseFilter, CssFilter, DiagnosticsFilter, ImagesFilter, LazyImagesFilter, MinifyHtmlFilter,
    MinifyInlineFilter, ScriptsFilter,
};
use super::{Filter, PipelineError};
use crate::rewrite::UrlRewriter;

/// What constructors may draw on.
#[derive(Clone)]
pub struct FilterDeps {
    pub rewriter: Arc<UrlRewriter>,
    pub lazy_skip: usize,
}

pub type FilterConstructor = fn(&FilterDeps) -> Arc<dyn Filter>;

const BASE_KEY: &str = "base";

pub struct FilterRegistry {
    constructors: BTreeMap<&'static str, FilterConstructor>,
    order: Vec<&'static str>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    /// Every built-in filter, in the order they run when enabled together.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("images", |deps| Arc::new(ImagesFilter::new(deps.rewriter.clone())));
        registry.register("css", |deps| Arc::new(CssFilter::new(deps.rewriter.clone())));
        registry.register("scripts", |deps| Arc::new(ScriptsFilter::new(deps.rewriter.clone())));
        registry.register("lazy_images", |deps| Arc::new(LazyImagesFilter::new(deps.lazy_skip)));
        registry.register("minify_inline", |_| Arc::new(MinifyInlineFilter::default()));
        registry.register("minify_html", |_| Arc::new(MinifyHtmlFilter));
        registry.register("diagnostics", |_| Arc::new(DiagnosticsFilter));
        registry
    }

    /// Later registrations under the same key replace earlier ones.
    pub fn register(&mut self, key: &'static str, constructor: FilterConstructor) {
        if self.constructors.insert(key, constructor).is_none() {
            self.order.push(key);
        }
    }

    /// Instantiate every registered filter. Those named in `enabled` run by
    /// default, in that order; the rest follow, off unless switched on. The
    /// base tracker always comes first.
    pub fn build(
        &self,
        enabled: &[String],
        deps: &FilterDeps,
    ) -> Result<Vec<(Arc<dyn Filter>, bool)>, PipelineError> {
        let mut chain: Vec<(Arc<dyn Filter>, bool)> = vec![(Arc::new(BaseFilter), true)];

        for key in enabled.iter().filter(|key| key.as_str() != BASE_KEY) {
            let constructor = self
                .constructors
                .get(key.as_str())
                .ok_or_else(|| PipelineError::UnknownFilter(key.clone()))?;
            if chain.iter().all(|(filter, _)| filter.key() != key.as_str()) {
                chain.push((constructor(deps), true));
            }
        }
        for key in &self.order {
            if chain.iter().all(|(filter, _)| filter.key() != *key) {
                chain.push((self.constructors[key](deps), false));
            }
        }
        Ok(chain)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::filters::testing::Site;

    fn deps(site: &Site) -> FilterDeps {
        FilterDeps {
            rewriter: site.rewriter.clone(),
            lazy_skip: 2,
        }
    }

    #[test]
    fn enabled_filters_lead_in_configured_order() {
        let site = Site::new();
        let chain = FilterRegistry::standard()
            .build(&["scripts".into(), "images".into(), "base".into()], &deps(&site))
            .unwrap();

        let summary: Vec<(&str, bool)> = chain
            .iter()
            .map(|(filter, enabled)| (filter.key(), *enabled))
            .collect();
        assert_eq!(
            &summary[..4],
            &[("base", true), ("scripts", true), ("images", true), ("css", false)]
        );
        assert_eq!(summary.len(), FilterRegistry::standard().order.len() + 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let site = Site::new();
        let err = FilterRegistry::standard()
            .build(&["sharpen".into()], &deps(&site))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::UnknownFilter(key) if key == "sharpen"));
    }
}
