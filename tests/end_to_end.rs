mod common;

use common::{PIXEL_GIF, Site, first_src, optimize, url};
use pagewright::domain::{RequestFormat, ResourceRetriever, Service};
use pagewright::infra::retrieval::FileRetriever;
use pagewright::protocol::{SALT_PARAM, ServiceRequest, Switches};
use pagewright::service::IncomingRequest;

const PAGE: &str = r#"<html><head></head><body><img src="a.png"></body></html>"#;

#[test]
fn local_image_is_rewritten_to_a_signed_service_url() {
    let site = Site::new();
    let image = site.write("a.png", b"\x89PNG\r\n\x1a\nfixture");
    let engine = site.engine_with(|settings| {
        settings.filters.allow = vec!["http://site.test/*".to_string()];
    });
    let page = url("http://site.test/index.html");

    let first = optimize(&engine, PAGE, &page, &Switches::default());
    let second = optimize(&engine, PAGE, &page, &Switches::default());
    assert_eq!(first, second, "rewriting must be deterministic");

    let rewritten = url(&first_src(&first));
    assert!(rewritten.as_str().starts_with("http://site.test/_pw/?"), "{rewritten}");

    let request = ServiceRequest::from_url(&rewritten, engine.rewriter().service_base())
        .expect("decodable service url");
    assert_eq!(request.service(), Some("images"));
    assert_eq!(request.src(), Some(image.as_str()));
    assert!(request.verify(engine.rewriter().signature()));

    let expected_salt = FileRetriever::new(url("http://site.test/"), site.docroot.path())
        .cache_salt(&image)
        .expect("local file has a salt")
        .to_string();
    assert_eq!(request.param(SALT_PARAM), Some(expected_salt.as_str()));
}

#[test]
fn missing_local_files_are_left_alone() {
    let site = Site::new();
    let engine = site.engine();
    let page = url("http://site.test/index.html");

    let out = optimize(&engine, PAGE, &page, &Switches::default());
    assert_eq!(out, PAGE);
}

#[test]
fn rewritten_image_round_trips_through_the_endpoint() {
    let site = Site::new();
    let image = site.write("img/dot.gif", PIXEL_GIF);
    let engine = site.engine();
    let page = url("http://site.test/blog/post.html");

    let html = r#"<p><img src="/img/dot.gif" alt="dot"></p>"#;
    let out = optimize(&engine, html, &page, &Switches::default());
    let response = engine.handle_request(&IncomingRequest::new(url(&first_src(&out))));

    assert_eq!(response.status, 200);
    assert_eq!(response.body.as_ref(), PIXEL_GIF);
    let canonical = format!("<{image}>; rel=\"canonical\"");
    assert_eq!(response.header("Link"), Some(canonical.as_str()));
    assert!(
        response
            .header("Cache-Control")
            .is_some_and(|value| value.contains("immutable"))
    );
}

#[test]
fn path_format_tolerates_density_stems() {
    let site = Site::new();
    let image = site.write("a.gif", PIXEL_GIF);
    let engine = site.engine_with(|settings| settings.service.format = RequestFormat::Path);

    let signed = engine
        .sign_url(&image, Service::Images)
        .expect("eligible image");
    assert!(signed.query().is_none(), "{signed}");
    assert!(signed.path().ends_with(".gif"), "{signed}");

    let mut retina = signed.clone();
    let path = signed.path().trim_end_matches(".gif").to_string();
    retina.set_path(&format!("{path}@2x.gif"));

    let response = engine.handle_request(&IncomingRequest::new(retina));
    assert_eq!(response.status, 200);
    assert_eq!(response.body.as_ref(), PIXEL_GIF);
}

#[test]
fn page_switches_turn_filters_off() {
    let site = Site::new();
    let engine = site.engine_with(|settings| {
        settings.filters.enabled = vec!["minify_html".into(), "lazy_images".into()];
        settings.filters.lazy_skip = 1;
    });
    let page = url("http://site.test/?pw=-lazy_images");
    let html = concat!(
        "<html><head><!-- build 42 --><title>Home</title></head><body>  ",
        r#"<img src="https://elsewhere.test/a.png">   "#,
        r#"<img src="https://elsewhere.test/b.png"> "#,
        "<pre>  keep   this  </pre></body></html>"
    );

    let all = optimize(&engine, html, &page, &Switches::default());
    insta::assert_snapshot!(all, @r#"<html><head><title>Home</title></head><body> <img src="https://elsewhere.test/a.png"> <img src="https://elsewhere.test/b.png" loading="lazy"> <pre>  keep   this  </pre></body></html>"#);

    let switches = engine.switches_for(&page, None);
    let without_lazy = optimize(&engine, html, &page, &switches);
    assert!(!without_lazy.contains("loading="));
    assert!(!without_lazy.contains("build 42"));
}

#[test]
fn latin1_documents_keep_their_bytes() {
    let site = Site::new();
    site.write("a.gif", PIXEL_GIF);
    let engine = site.engine();
    let page = url("http://site.test/");
    let html: &[u8] = b"<html><body><p>caf\xe9</p><img alt=\"\xe9t\xe9\" src=\"a.gif\"></body></html>";

    let out = engine.optimize_document(html, &page, &Switches::default());
    assert!(out.starts_with(b"<html><body><p>caf\xe9</p><img alt=\"\xe9t\xe9\" src=\"http://site.test/_pw/?"));
    assert!(out.ends_with(b"\"></body></html>"));
    assert!(std::str::from_utf8(&out).is_err());
}
