//! Credential module tests

use std::sync::Arc;

use proptest::prelude::*;

use super::*;
use crate::context::TracingLog;

fn passthrough_context(locator: &str) -> InvocationContext {
    InvocationContext::new(
        "0ne000000A1",
        locator,
        Arc::new(TracingLog),
        Arc::new(PassthroughResolver),
    )
}

#[tokio::test]
async fn test_passthrough_returns_locator() {
    let ctx = passthrough_context("primary-key==");
    let credential = PassthroughResolver
        .resolve("primary-key==", &ctx)
        .await
        .unwrap();
    assert_eq!(credential.expose(), "primary-key==");
}

#[tokio::test]
async fn test_context_resolves_configured_locator() {
    let ctx = passthrough_context("https://vault.example.net/secrets/iotc");
    let credential = ctx.resolve_credential().await.unwrap();
    assert_eq!(
        credential,
        Credential::new("https://vault.example.net/secrets/iotc")
    );
}

#[tokio::test]
async fn test_passthrough_through_arc() {
    let resolver: Arc<dyn CredentialResolver> = Arc::new(PassthroughResolver);
    let ctx = passthrough_context("");
    let credential = resolver.resolve("", &ctx).await.unwrap();
    assert_eq!(credential.expose(), "");
}

#[test]
fn test_credential_debug_is_redacted() {
    let credential = Credential::new("super-secret");
    let debug = format!("{:?}", credential);
    assert!(!debug.contains("super-secret"));
    assert_eq!(debug, "Credential(***)");
}

#[test]
fn test_resolution_error_display() {
    assert_eq!(
        ResolutionError::Unreachable("timeout".to_string()).to_string(),
        "Secret store unreachable: timeout"
    );
    assert_eq!(
        ResolutionError::NotFound("kv://x".to_string()).to_string(),
        "Secret not found: kv://x"
    );
}

proptest! {
    #[test]
    fn prop_passthrough_is_identity(locator in ".*") {
        let ctx = passthrough_context(&locator);
        let result = tokio_test::block_on(PassthroughResolver.resolve(&locator, &ctx));
        prop_assert!(result.is_ok());
        let credential = result.unwrap();
        prop_assert_eq!(credential.expose(), locator.as_str());
    }
}
