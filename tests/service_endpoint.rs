mod common;

use std::fs;
use std::io::Read;

use common::{PIXEL_GIF, Site, url};
use flate2::read::GzDecoder;
use pagewright::domain::Service;
use pagewright::service::IncomingRequest;
use url::Url;

fn with_param(signed: &Url, key: &str, value: &str) -> Url {
    let pairs: Vec<(String, String)> = signed
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == key { value.to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    let mut tampered = signed.clone();
    tampered.query_pairs_mut().clear().extend_pairs(pairs);
    tampered
}

#[test]
fn tampered_parameters_are_unauthorized() {
    let site = Site::new();
    let first = site.write("a.gif", PIXEL_GIF);
    let second = site.write("b.gif", PIXEL_GIF);
    let engine = site.engine();

    let signed = engine.sign_url(&first, Service::Images).expect("sign");
    assert_eq!(engine.handle_request(&IncomingRequest::new(signed.clone())).status, 200);

    let tampered = with_param(&signed, "src", second.as_str());
    let response = engine.handle_request(&IncomingRequest::new(tampered));
    assert_eq!(response.status, 401);
    assert_eq!(response.header("Cache-Control"), Some("no-store"));
}

#[test]
fn unsigned_requests_need_the_trusted_header() {
    let site = Site::new();
    let image = site.write("a.gif", PIXEL_GIF);
    let engine = site.engine();

    let mut unsigned = url("http://site.test/_pw/");
    unsigned
        .query_pairs_mut()
        .append_pair("service", "images")
        .append_pair("src", image.as_str());

    let plain = IncomingRequest::new(unsigned.clone());
    assert_eq!(engine.handle_request(&plain).status, 401);

    let trusted = IncomingRequest::new(unsigned).with_header("x-pagewright-trusted", "1");
    let response = engine.handle_request(&trusted);
    assert_eq!(response.status, 200);
    assert_eq!(response.body.as_ref(), PIXEL_GIF);
}

#[test]
fn resources_that_stop_being_eligible_are_forbidden() {
    let site = Site::new();
    let image = site.write("gone.gif", PIXEL_GIF);
    let engine = site.engine();

    let signed = engine.sign_url(&image, Service::Images).expect("sign");
    fs::remove_file(site.docroot.path().join("gone.gif")).expect("remove");

    let response = engine.handle_request(&IncomingRequest::new(signed));
    assert_eq!(response.status, 403);
}

#[test]
fn unresolvable_requests_are_not_found() {
    let site = Site::new();
    let engine = site.engine();

    for raw in [
        "http://site.test/_pw/?service=images",
        "http://site.test/_pw/?service=bundler&ref=00000000deadbeef",
        "http://site.test/_pw/?service=video&src=http%3A%2F%2Fsite.test%2Fa.gif",
    ] {
        let response = engine.handle_request(&IncomingRequest::new(url(raw)));
        assert_eq!(response.status, 404, "{raw}");
    }
}

#[test]
fn stylesheets_are_minified_and_gzip_negotiated() {
    let site = Site::new();
    let sheet = site.write("site.css", b"a { color: red; }");
    let engine = site.engine();
    let signed = engine.sign_url(&sheet, Service::Css).expect("sign");

    let response = engine.handle_request(
        &IncomingRequest::new(signed.clone()).with_header("Accept-Encoding", "gzip, br"),
    );
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Encoding"), Some("gzip"));
    assert_eq!(response.header("Link"), None);

    let mut decoded = String::new();
    GzDecoder::new(response.body.as_ref())
        .read_to_string(&mut decoded)
        .expect("gzip body");
    assert_eq!(decoded, "a{color: red}");

    let etag = response.header("ETag").expect("etag").to_string();
    let revalidated = engine.handle_request(
        &IncomingRequest::new(signed).with_header("If-None-Match", etag),
    );
    assert_eq!(revalidated.status, 304);
    assert!(revalidated.body.is_empty());
}

#[test]
fn bundles_concatenate_their_parts_in_order() {
    let site = Site::new();
    let first = site.write("js/a.js", b"a();   \n\n");
    let second = site.write("js/b.js", b"b();\n");
    let engine = site.engine();

    let bundle = engine.bundle_url(&[first, second]).expect("bundle url");
    assert!(bundle.query_pairs().any(|(key, _)| key == "ref"), "{bundle}");

    let response = engine.handle_request(&IncomingRequest::new(bundle));
    assert_eq!(response.status, 200);
    assert_eq!(response.body.as_ref(), b"a();\nb();");
}
