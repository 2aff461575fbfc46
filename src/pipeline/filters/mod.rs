//! Built-in filters.

mod base;
mod css;
mod diagnostics;
mod images;
mod lazy_images;
mod minify;
mod scripts;

use url::Url;

pub use base::BaseFilter;
pub use css::CssFilter;
pub use diagnostics::DiagnosticsFilter;
pub use images::ImagesFilter;
pub use lazy_images::LazyImagesFilter;
pub use minify::{MinifyHtmlFilter, MinifyInlineFilter, collapse_whitespace};
pub use scripts::ScriptsFilter;

use crate::domain::Service;
use crate::html::{ParseError, Tag};
use crate::rewrite::{UrlRewriter, rewrite_srcset};

/// Route the URL in `tag[attr]` through `service` if the rewriter accepts it.
fn rewrite_attr(
    rewriter: &UrlRewriter,
    tag: &mut Tag,
    attr: &str,
    base: &Url,
    service: Service,
) -> Result<(), ParseError> {
    let Some(value) = tag.attr(attr)? else {
        return Ok(());
    };
    let replacement = rewriter.rewrite(value, base, service).into_replacement();
    if let Some(replacement) = replacement {
        tag.set_attr(attr, replacement);
    }
    Ok(())
}

fn rewrite_srcset_attr(
    rewriter: &UrlRewriter,
    tag: &mut Tag,
    base: &Url,
    service: Service,
) -> Result<(), ParseError> {
    let Some(value) = tag.attr("srcset")? else {
        return Ok(());
    };
    let replacement = rewrite_srcset(value, |url| {
        rewriter.rewrite(url, base, service).into_replacement()
    });
    if let Some(replacement) = replacement {
        tag.set_attr("srcset", replacement);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixture shared by the filter tests.

    use std::sync::Arc;

    use url::Url;

    use crate::cache::{Cache, CacheConfig, CachePool};
    use crate::domain::{CacheSalt, RequestFormat};
    use crate::html::tokenize;
    use crate::infra::retrieval::StaticRetriever;
    use crate::pipeline::{ElementStream, Filter, PageContext};
    use crate::protocol::{Identity, Signature, Switches};
    use crate::rewrite::{AllowList, InlineCache, UrlRewriter};

    pub struct Site {
        _dir: tempfile::TempDir,
        pub retriever: Arc<StaticRetriever>,
        pub rewriter: Arc<UrlRewriter>,
    }

    impl Site {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = CacheConfig {
                root: dir.path().to_path_buf(),
                ..CacheConfig::default()
            };
            let cache = Cache::new(Arc::new(CachePool::new()), config, "inline");
            let retriever = Arc::new(StaticRetriever::new());
            let rewriter = Arc::new(UrlRewriter::new(
                Arc::new(Signature::new(Identity::new("t", "secret"))),
                AllowList::empty(),
                retriever.clone(),
                InlineCache::new(cache, 0),
                Url::parse("http://site.test/_pw/").unwrap(),
                RequestFormat::Query,
            ));
            Self {
                _dir: dir,
                retriever,
                rewriter,
            }
        }

        /// Make `path` locally retrievable under the site origin.
        pub fn publish(&self, path: &str) -> Url {
            let url = Url::parse("http://site.test/").unwrap().join(path).unwrap();
            self.retriever.insert(&url, "bytes", Some(CacheSalt::new(5)));
            url
        }
    }

    pub fn page() -> Url {
        Url::parse("http://site.test/").unwrap()
    }

    /// Run `filter` alone over `html` and render the result.
    pub fn run(filter: &dyn Filter, html: &str) -> String {
        let ctx = PageContext::new(page(), Switches::default());
        run_with(filter, html, &ctx)
    }

    pub fn run_with(filter: &dyn Filter, html: &str, ctx: &PageContext) -> String {
        let input: ElementStream<'_> = Box::new(tokenize(html.as_bytes()).map(Ok));
        let mut out = Vec::new();
        for element in filter.apply(input, ctx) {
            element.unwrap().render_into(&mut out).unwrap();
        }
        String::from_utf8(out).unwrap()
    }
}
