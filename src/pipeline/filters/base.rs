use crate::pipeline::{ElementStream, Filter, PageContext, for_each_tag};

/// Records the document's `<base href>` so later filters resolve against it.
#[derive(Debug, Default)]
pub struct BaseFilter;

impl Filter for BaseFilter {
    fn key(&self) -> &'static str {
        "base"
    }

    fn apply<'a>(&'a self, input: ElementStream<'a>, ctx: &'a PageContext) -> ElementStream<'a> {
        for_each_tag(input, move |tag| {
            if tag.name() == "base"
                && let Some(href) = tag.attr("href")?
                && let Ok(base) = ctx.page_url().join(href.trim())
            {
                ctx.set_base(base);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::filters::testing::{page, run_with};
    use crate::protocol::Switches;

    #[test]
    fn base_href_is_resolved_against_the_page() {
        let ctx = PageContext::new(page().join("blog/post").unwrap(), Switches::default());
        let html = r#"<head><base href="/assets/"><base href="/ignored/"></head>"#;
        assert_eq!(run_with(&BaseFilter, html, &ctx), html);
        assert_eq!(ctx.base().as_str(), "http://site.test/assets/");
    }
}
