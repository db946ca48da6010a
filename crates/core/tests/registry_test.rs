//! Registry semantics: duplicate rejection is all-or-nothing, descriptor
//! lifetime tracks the provider, SDK compatibility is checked at the door.

mod common;

use common::MockProvider;
use relay_core::ActionRegistry;
use relay_shared::{ActionDescriptor, RelayError};
use std::sync::Arc;

#[tokio::test]
async fn test_register_and_resolve() {
    let registry = ActionRegistry::new();
    registry
        .register_provider(Arc::new(MockProvider::new("mock.a", "alpha")))
        .await
        .unwrap();

    let entry = registry.resolve("alpha").await.unwrap();
    assert_eq!(entry.descriptor.name, "alpha");
    assert_eq!(entry.provider_id, "mock.a");
}

#[tokio::test]
async fn test_duplicate_action_name_rejected() {
    let registry = ActionRegistry::new();
    registry
        .register_provider(Arc::new(MockProvider::new("mock.a", "alpha")))
        .await
        .unwrap();

    let err = registry
        .register_provider(Arc::new(MockProvider::new("mock.b", "alpha")))
        .await
        .unwrap_err();
    match err {
        RelayError::DuplicateAction(name) => assert_eq!(name, "alpha"),
        other => panic!("expected DuplicateAction, got {:?}", other),
    }
}

#[tokio::test]
async fn test_duplicate_rejection_is_all_or_nothing() {
    let registry = ActionRegistry::new();
    registry
        .register_provider(Arc::new(MockProvider::new("mock.a", "alpha")))
        .await
        .unwrap();

    // Second provider brings one fresh and one clashing action
    let provider = MockProvider::new("mock.b", "unused").with_actions(vec![
        ActionDescriptor::new("beta", "fresh"),
        ActionDescriptor::new("alpha", "clash"),
    ]);
    assert!(registry.register_provider(Arc::new(provider)).await.is_err());

    // The fresh action must not have been half-registered
    assert!(matches!(
        registry.resolve("beta").await,
        Err(RelayError::ActionNotFound(_))
    ));
    assert!(registry.list_providers().await.iter().all(|m| m.id != "mock.b"));
}

#[tokio::test]
async fn test_duplicate_provider_id_rejected() {
    let registry = ActionRegistry::new();
    registry
        .register_provider(Arc::new(MockProvider::new("mock.a", "alpha")))
        .await
        .unwrap();

    let err = registry
        .register_provider(Arc::new(MockProvider::new("mock.a", "beta")))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::DuplicateAction(_)));
}

#[tokio::test]
async fn test_unregister_removes_all_provider_actions() {
    let registry = ActionRegistry::new();
    let provider = MockProvider::new("mock.multi", "unused").with_actions(vec![
        ActionDescriptor::new("one", "first"),
        ActionDescriptor::new("two", "second"),
    ]);
    registry.register_provider(Arc::new(provider)).await.unwrap();
    registry
        .register_provider(Arc::new(MockProvider::new("mock.other", "three")))
        .await
        .unwrap();

    registry.unregister_provider("mock.multi").await.unwrap();

    assert!(registry.resolve("one").await.is_err());
    assert!(registry.resolve("two").await.is_err());
    // Unrelated provider survives
    assert!(registry.resolve("three").await.is_ok());
}

#[tokio::test]
async fn test_unregister_unknown_provider_fails() {
    let registry = ActionRegistry::new();
    assert!(registry.unregister_provider("mock.ghost").await.is_err());
}

#[tokio::test]
async fn test_incompatible_sdk_rejected() {
    let registry = ActionRegistry::new();
    let provider = MockProvider::new("mock.old", "ancient").with_sdk_version("99.0.0");

    let err = registry.register_provider(Arc::new(provider)).await.unwrap_err();
    assert!(matches!(err, RelayError::SdkVersion(_)));
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_descriptor_with_bad_default_rejected_at_registration() {
    use relay_shared::{ParamSpec, ParamType};

    let registry = ActionRegistry::new();
    let provider = MockProvider::new("mock.bad", "unused").with_actions(vec![
        ActionDescriptor::new("broken", "bad default").with_param(
            "count",
            ParamSpec::optional(ParamType::Integer, serde_json::json!("five")),
        ),
    ]);

    let err = registry.register_provider(Arc::new(provider)).await.unwrap_err();
    assert!(matches!(err, RelayError::Config(_)));
}

#[tokio::test]
async fn test_listings_are_sorted() {
    let registry = ActionRegistry::new();
    registry
        .register_provider(Arc::new(MockProvider::new("mock.z", "zeta")))
        .await
        .unwrap();
    registry
        .register_provider(Arc::new(MockProvider::new("mock.a", "alpha")))
        .await
        .unwrap();

    let actions: Vec<String> = registry
        .list_actions()
        .await
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(actions, vec!["alpha", "zeta"]);

    let providers: Vec<String> = registry
        .list_providers()
        .await
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(providers, vec!["mock.a", "mock.z"]);
}
