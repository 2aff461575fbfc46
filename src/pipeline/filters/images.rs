use std::sync::Arc;

use super::{rewrite_attr, rewrite_srcset_attr};
use crate::domain::Service;
use crate::pipeline::{ElementStream, Filter, PageContext, for_each_tag};
use crate::rewrite::UrlRewriter;

/// Sends image references through the image service.
pub struct ImagesFilter {
    rewriter: Arc<UrlRewriter>,
}

impl ImagesFilter {
    pub fn new(rewriter: Arc<UrlRewriter>) -> Self {
        Self { rewriter }
    }
}

impl Filter for ImagesFilter {
    fn key(&self) -> &'static str {
        "images"
    }

    fn apply<'a>(&'a self, input: ElementStream<'a>, ctx: &'a PageContext) -> ElementStream<'a> {
        let rewriter = self.rewriter.as_ref();
        for_each_tag(input, move |tag| {
            let base = ctx.base();
            match tag.name() {
                "img" => {
                    rewrite_attr(rewriter, tag, "src", &base, Service::Images)?;
                    rewrite_srcset_attr(rewriter, tag, &base, Service::Images)?;
                }
                "source" => rewrite_srcset_attr(rewriter, tag, &base, Service::Images)?,
                "input"
                    if tag
                        .attr("type")?
                        .is_some_and(|kind| kind.eq_ignore_ascii_case("image")) =>
                {
                    rewrite_attr(rewriter, tag, "src", &base, Service::Images)?;
                }
                _ => {}
            }
            Ok(())
        })
    }
}
