#![allow(dead_code)]

use std::fs;
use std::path::Path;

use pagewright::{
    Engine,
    config::{self, Settings},
    protocol::Switches,
};
use url::Url;

/// A 1x1 transparent GIF.
pub const PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// A site served from a temporary document root with its own cache.
pub struct Site {
    pub docroot: tempfile::TempDir,
    pub cache: tempfile::TempDir,
}

impl Site {
    pub fn new() -> Self {
        Self {
            docroot: tempfile::tempdir().expect("docroot"),
            cache: tempfile::tempdir().expect("cache dir"),
        }
    }

    pub fn write(&self, path: &str, bytes: &[u8]) -> Url {
        let target = self.docroot.path().join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&target, bytes).expect("write fixture");
        url(&format!("http://site.test/{path}"))
    }

    pub fn engine(&self) -> Engine {
        self.engine_with(|_| {})
    }

    /// Engine over this site after `configure` adjusts the base settings.
    pub fn engine_with(&self, configure: impl FnOnce(&mut Settings)) -> Engine {
        let source = format!(
            r#"
[site]
origin = "http://site.test/"
document_root = {docroot:?}

[cache]
root = {cache:?}

[service]
url = "/_pw/"
identity = {{ name = "edge", secret = "integration" }}
trusted_header = "X-Pagewright-Trusted"
"#,
            docroot = display(self.docroot.path()),
            cache = display(self.cache.path()),
        );
        let mut settings = config::from_toml(&source).expect("valid settings");
        configure(&mut settings);
        Engine::new(settings).expect("engine")
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

pub fn url(raw: &str) -> Url {
    Url::parse(raw).expect("valid url")
}

/// First `src` attribute value in `document`, entity-decoded.
pub fn first_src(document: &str) -> String {
    let start = document.find("src=\"").expect("src attribute") + 5;
    let end = start + document[start..].find('"').expect("closing quote");
    document[start..end].replace("&amp;", "&")
}

/// Optimize a UTF-8 `html` document and decode the result.
pub fn optimize(engine: &Engine, html: &str, page: &Url, switches: &Switches) -> String {
    String::from_utf8(engine.optimize_document(html.as_bytes(), page, switches))
        .expect("utf-8 output")
}
