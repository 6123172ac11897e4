//! Lease lifecycle through the public registry API

use colorproxy_router::{
    DirectSelector, KvRouteStore, KvStore, MemoryKvStore, RegistryError, Route, RouteStore,
    Selector, ROUTE_KEY_PREFIX,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_register_heartbeat_sweep_cycle() {
    let store = Arc::new(MemoryKvStore::new());
    let registry: Arc<dyn RouteStore> = Arc::new(KvRouteStore::new(store.clone()));
    let selector = DirectSelector::new(registry.clone());

    // A backend registers with a very short lease
    let route = Route::new("canary", "http://127.0.0.1:9100", "tok").with_owner("deploy-bot");
    registry
        .register(route, Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(
        selector.resolve("canary").await.unwrap(),
        "http://127.0.0.1:9100"
    );

    // The stored document carries the wire field names
    let raw = store
        .get(&format!("{}canary", ROUTE_KEY_PREFIX))
        .await
        .unwrap()
        .unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["color"], "canary");
    assert_eq!(doc["owner"], "deploy-bot");
    assert!(doc["expires_at"].is_string());

    // A heartbeat extends the lease past the original expiry
    registry
        .heartbeat("canary", "http://127.0.0.1:9100", "tok", Duration::from_secs(60))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(registry.delete_expired().await.unwrap(), 0);
    assert!(registry.get("canary").await.unwrap().is_live());

    // Deregistration removes it for good
    registry.delete("canary").await.unwrap();
    assert!(matches!(
        selector.resolve("canary").await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_unrenewed_lease_disappears() {
    let registry = KvRouteStore::in_memory();
    registry
        .register(
            Route::new("short", "http://127.0.0.1:9200", "tok"),
            Duration::from_millis(20),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;

    // The store entry lapsed together with the lease
    assert!(registry.list().await.unwrap().is_empty());
    assert!(matches!(
        registry
            .heartbeat("short", "http://127.0.0.1:9200", "tok", Duration::from_secs(1))
            .await,
        Err(RegistryError::NotFound(_))
    ));
}
