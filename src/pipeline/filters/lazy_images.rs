use crate::pipeline::{ElementStream, Filter, PageContext, for_each_tag};

/// Defers loading of every image after the first `skip`.
#[derive(Debug)]
pub struct LazyImagesFilter {
    skip: usize,
}

impl LazyImagesFilter {
    pub fn new(skip: usize) -> Self {
        Self { skip }
    }
}

impl Filter for LazyImagesFilter {
    fn key(&self) -> &'static str {
        "lazy_images"
    }

    fn apply<'a>(&'a self, input: ElementStream<'a>, _ctx: &'a PageContext) -> ElementStream<'a> {
        let mut seen = 0usize;
        for_each_tag(input, move |tag| {
            if tag.name() != "img" {
                return Ok(());
            }
            seen += 1;
            if seen > self.skip && !tag.has_attr("loading")? && !tag.has_attr("data-no-lazy")? {
                tag.set_attr("loading", "lazy");
            }
            Ok(())
        })
    }
}
