//! Identifier resolution against an in-memory runtime.

mod common;

use std::sync::Arc;

use common::MockRuntime;
use thinscan_core::{IdentifierResolver, ObjectKind, ResolvedRef, ThinscanError};

const RHEL_A: &str = "sha256:aaaa1111aaaa1111aaaa1111aaaa1111aaaa1111aaaa1111aaaa1111aaaa1111";
const RHEL_B: &str = "sha256:bbbb2222bbbb2222bbbb2222bbbb2222bbbb2222bbbb2222bbbb2222bbbb2222";
const NGINX: &str = "sha256:cccc3333cccc3333cccc3333cccc3333cccc3333cccc3333cccc3333cccc3333";
const WEB: &str = "4f2a9c0d11e2aa0123456789abcdef0123456789abcdef0123456789abcdef01";

fn resolver(runtime: MockRuntime) -> IdentifierResolver {
    IdentifierResolver::new(Arc::new(runtime))
}

fn host() -> MockRuntime {
    MockRuntime::new()
        .with_image(RHEL_A, &["rhel7:latest", "rhel7:7.1"])
        .with_image(RHEL_B, &["rhel7:7.0"])
        .with_image(NGINX, &["nginx:latest", "nginx:1.25"])
        .with_container(WEB, "web", NGINX, true)
}

#[tokio::test]
async fn test_container_by_id_prefix_and_name() {
    let r = resolver(host());

    assert_eq!(r.resolve("4f2a9c").await.unwrap(), ResolvedRef::container(WEB));
    assert_eq!(r.resolve("web").await.unwrap(), ResolvedRef::container(WEB));
    assert_eq!(r.resolve("/web").await.unwrap(), ResolvedRef::container(WEB));
}

#[tokio::test]
async fn test_container_shadows_image_of_same_name() {
    let runtime = host().with_container("9999aaaa", "nginx", NGINX, false);
    let resolved = resolver(runtime).resolve("nginx").await.unwrap();
    assert_eq!(resolved.kind, ObjectKind::Container);
    assert_eq!(resolved.canonical_id, "9999aaaa");
}

#[tokio::test]
async fn test_image_name_with_tags_of_one_image() {
    // nginx:latest and nginx:1.25 are the same image object
    let resolved = resolver(host()).resolve("nginx").await.unwrap();
    assert_eq!(resolved, ResolvedRef::image(NGINX));
}

#[tokio::test]
async fn test_exact_tag_disambiguates() {
    let r = resolver(host());
    assert_eq!(r.resolve("rhel7:7.0").await.unwrap(), ResolvedRef::image(RHEL_B));
    assert_eq!(r.resolve("rhel7:latest").await.unwrap(), ResolvedRef::image(RHEL_A));
}

#[tokio::test]
async fn test_same_name_different_ids_is_ambiguous() {
    let err = resolver(host()).resolve("rhel7").await.unwrap_err();
    match err {
        ThinscanError::AmbiguousIdentifier { input, reason } => {
            assert_eq!(input, "rhel7");
            assert!(reason.contains("different image IDs"), "{}", reason);
        }
        other => panic!("expected AmbiguousIdentifier, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_tag_among_same_named_images_is_ambiguous() {
    let err = resolver(host()).resolve("rhel7:6.9").await.unwrap_err();
    assert!(matches!(err, ThinscanError::AmbiguousIdentifier { .. }));
}

#[tokio::test]
async fn test_single_candidate_ignores_tag_mismatch() {
    let runtime = MockRuntime::new().with_image(NGINX, &["nginx:latest"]);
    let resolved = resolver(runtime).resolve("nginx:1.0").await.unwrap();
    assert_eq!(resolved, ResolvedRef::image(NGINX));
}

#[tokio::test]
async fn test_image_id_prefix() {
    let r = resolver(host());
    assert_eq!(r.resolve("cccc3333").await.unwrap(), ResolvedRef::image(NGINX));
    assert_eq!(r.resolve("sha256:bbbb").await.unwrap(), ResolvedRef::image(RHEL_B));
}

#[tokio::test]
async fn test_unknown_and_empty_inputs_are_not_found() {
    let r = resolver(host());
    assert!(matches!(r.resolve("postgres").await, Err(ThinscanError::NotFound { .. })));
    assert!(matches!(r.resolve("").await, Err(ThinscanError::NotFound { .. })));
}
