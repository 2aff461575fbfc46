use std::sync::Arc;

use super::rewrite_attr;
use crate::domain::Service;
use crate::pipeline::{ElementStream, Filter, PageContext, for_each_tag};
use crate::rewrite::UrlRewriter;

pub struct ScriptsFilter {
    rewriter: Arc<UrlRewriter>,
}

impl ScriptsFilter {
    pub fn new(rewriter: Arc<UrlRewriter>) -> Self {
        Self { rewriter }
    }
}

impl Filter for ScriptsFilter {
    fn key(&self) -> &'static str {
        "scripts"
    }

    fn apply<'a>(&'a self, input: ElementStream<'a>, ctx: &'a PageContext) -> ElementStream<'a> {
        for_each_tag(input, move |tag| {
            if tag.name() == "script" {
                rewrite_attr(&self.rewriter, tag, "src", &ctx.base(), Service::Scripts)?;
            }
            Ok(())
        })
    }
}
