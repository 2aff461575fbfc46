use pagewright::domain::{RequestFormat, Service};
use pagewright::protocol::{Identity, SALT_PARAM, SRC_PARAM, ServiceRequest, Signature, Switches};
use url::Url;

fn base() -> Url {
    Url::parse("https://cdn.test/_pw/").unwrap()
}

fn signature() -> Signature {
    Signature::new(Identity::new("edge", "current")).with_verifier(Identity::new("old", "retired"))
}

fn sample() -> ServiceRequest {
    ServiceRequest::for_service(Service::Images)
        .with_param(SRC_PARAM, "https://site.test/img/hero.png")
        .with_param(SALT_PARAM, "1700000000")
        .with_param("w", "640")
        .with_base(base())
}

#[test]
fn changing_any_parameter_breaks_the_token() {
    let signed = sample().signed(&signature());
    assert!(signed.verify(&signature()));

    for (key, value) in [
        ("service", "css"),
        (SRC_PARAM, "https://site.test/img/other.png"),
        (SALT_PARAM, "1700000001"),
        ("w", "6400"),
    ] {
        let tampered = signed.clone().with_param(key, value);
        assert!(!tampered.verify(&signature()), "{key} was not covered");
    }

    let extended = signed.with_param("h", "480");
    assert!(!extended.verify(&signature()));
}

#[test]
fn retired_identities_still_verify() {
    let old = Signature::new(Identity::new("old", "retired"));
    let signed = sample().signed(&old);
    assert!(signed.verify(&signature()));

    let unknown = Signature::new(Identity::new("rogue", "retired"));
    assert!(!sample().signed(&unknown).verify(&signature()));
}

#[test]
fn path_format_round_trips_with_a_retina_stem() {
    let signed = sample()
        .with_stem(Some("@2x".to_string()))
        .signed(&signature());
    let url = signed.to_url(RequestFormat::Path).unwrap();

    assert!(url.query().is_none());
    assert!(url.path().starts_with("/_pw/"), "{url}");
    assert!(url.path().ends_with("@2x.png"), "{url}");

    let decoded = ServiceRequest::from_url(&url, &base()).unwrap();
    assert_eq!(decoded.canonical(), sample().canonical());
    assert_eq!(decoded.stem(), Some("@2x"));
    assert!(decoded.verify(&signature()));
}

#[test]
fn long_parameter_sets_are_split_across_segments() {
    let long_src = format!("https://site.test/{}.css", "deep/".repeat(80));
    let request = ServiceRequest::for_service(Service::Css)
        .with_param(SRC_PARAM, long_src.as_str())
        .with_base(base())
        .signed(&signature());
    let url = request.to_url(RequestFormat::Path).unwrap();

    let segments: Vec<&str> = url.path_segments().unwrap().collect();
    assert!(segments.len() > 3, "{url}");
    assert!(segments.iter().all(|segment| segment.len() <= 255));

    let decoded = ServiceRequest::from_url(&url, &base()).unwrap();
    assert_eq!(decoded.src(), Some(long_src.as_str()));
    assert!(decoded.verify(&signature()));
}

#[test]
fn switches_travel_outside_the_signed_parameters() {
    let signed = sample().signed(&signature());
    let mut url = signed.to_url(RequestFormat::Query).unwrap();
    url.query_pairs_mut().append_pair("pw", "nocache,-images");

    let decoded = ServiceRequest::from_url(&url, &base()).unwrap();
    assert!(decoded.verify(&signature()));
    assert!(decoded.switches().nocache());
    assert_eq!(decoded.switches(), &Switches::parse("-images,nocache"));
}
