//! Tests for image reference parsing and digest normalisation.

use ccrun::image::{Digest, ImageRef};

// =============================================================================
// Reference Parsing
// =============================================================================

#[test]
fn bare_names_resolve_to_official_images() {
    for (input, repository) in [
        ("alpine", "library/alpine"),
        ("busybox", "library/busybox"),
        ("nginx", "library/nginx"),
    ] {
        let r = ImageRef::parse(input).unwrap();
        assert_eq!(r.registry, "registry-1.docker.io");
        assert_eq!(r.repository, repository);
        assert_eq!(r.tag, "latest");
    }
}

#[test]
fn explicit_tags_are_preserved() {
    let r = ImageRef::parse("alpine:3.18").unwrap();
    assert_eq!(r.repository, "library/alpine");
    assert_eq!(r.tag, "3.18");

    let r = ImageRef::parse("grafana/grafana:10.2.0").unwrap();
    assert_eq!(r.repository, "grafana/grafana");
    assert_eq!(r.tag, "10.2.0");
}

#[test]
fn namespaced_names_skip_the_library_prefix() {
    let r = ImageRef::parse("prom/prometheus").unwrap();
    assert_eq!(r.repository, "prom/prometheus");
    assert_eq!(r.tag, "latest");
}

#[test]
fn slash_after_colon_belongs_to_the_name() {
    // The portion after the last ':' contains '/', so there is no tag.
    let r = ImageRef::parse("host:5000/app").unwrap();
    assert_eq!(r.repository, "host:5000/app");
    assert_eq!(r.tag, "latest");
}

#[test]
fn parse_render_round_trip_is_stable() {
    for input in ["alpine", "alpine:3.18", "prom/prometheus:v2"] {
        let first = ImageRef::parse(input).unwrap();
        // Re-parsing the repository:tag portion of the rendered form yields
        // a semantically equivalent reference.
        let rendered = format!("{}:{}", first.repository, first.tag);
        let second = ImageRef::parse(&rendered).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn invalid_references_are_configuration_errors() {
    for input in ["", ":tag", "name with spaces", "shell;injection"] {
        assert!(ImageRef::parse(input).is_err(), "should reject {:?}", input);
    }

    let long = "a".repeat(600);
    assert!(ImageRef::parse(&long).is_err());
}

// =============================================================================
// Digest Normalisation
// =============================================================================

const HASH: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

#[test]
fn bare_hex_and_prefixed_digests_normalise_identically() {
    let bare = Digest::parse(HASH).unwrap();
    let prefixed = Digest::parse(&format!("sha256:{}", HASH)).unwrap();
    assert_eq!(bare, prefixed);
    assert_eq!(bare.as_str(), format!("sha256:{}", HASH));
}

#[test]
fn normalisation_is_idempotent() {
    let once = Digest::parse(HASH).unwrap();
    let twice = Digest::parse(once.as_str()).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn computed_digests_match_known_vectors() {
    // SHA-256 of "hello world".
    let d = Digest::from_content(b"hello world");
    assert_eq!(d.hex(), HASH);
}

#[test]
fn malformed_digests_are_rejected() {
    let upper = HASH.to_uppercase();
    for input in ["", "sha256:", "sha256:abcd", "zz", upper.as_str()] {
        assert!(Digest::parse(input).is_err(), "should reject {:?}", input);
    }
}
