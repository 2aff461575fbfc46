use std::borrow::Cow;
use std::sync::Arc;

use url::Url;

use super::rewrite_attr;
use crate::domain::Service;
use crate::pipeline::{ElementStream, Filter, PageContext, for_each_tag};
use crate::rewrite::{UrlRewriter, rewrite_css_urls};

/// Stylesheet links go through the css service; `url()` references in
/// inline CSS go through the image service.
pub struct CssFilter {
    rewriter: Arc<UrlRewriter>,
}

impl CssFilter {
    pub fn new(rewriter: Arc<UrlRewriter>) -> Self {
        Self { rewriter }
    }

    fn rewrite_inline(&self, css: &str, base: &Url) -> Option<String> {
        let rewritten = rewrite_css_urls(css, |url| {
            self.rewriter
                .rewrite(url, base, Service::Images)
                .into_replacement()
        });
        match rewritten {
            Cow::Owned(css) => Some(css),
            Cow::Borrowed(_) => None,
        }
    }
}

fn is_stylesheet(rel: &str) -> bool {
    rel.split_ascii_whitespace()
        .any(|token| token.eq_ignore_ascii_case("stylesheet"))
}

impl Filter for CssFilter {
    fn key(&self) -> &'static str {
        "css"
    }

    fn apply<'a>(&'a self, input: ElementStream<'a>, ctx: &'a PageContext) -> ElementStream<'a> {
        for_each_tag(input, move |tag| {
            let base = ctx.base();
            if tag.name() == "link" && tag.attr("rel")?.is_some_and(is_stylesheet) {
                rewrite_attr(&self.rewriter, tag, "href", &base, Service::Css)?;
            }
            if tag.name() == "style"
                && let Some(css) = tag.content().and_then(|css| self.rewrite_inline(css, &base))
            {
                tag.set_content(css);
            }
            let declarations = match tag.attr("style")? {
                Some(style) => self.rewrite_inline(style, &base),
                None => None,
            };
            if let Some(declarations) = declarations {
                tag.set_attr("style", declarations);
            }
            Ok(())
        })
    }
}
