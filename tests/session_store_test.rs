// Integration tests for the reactive store binding: snapshot/subscribe
// contract, transition callbacks, the builder wiring and the periodic
// refresh driver.
use keeprs::settings::KeeprsSettings;
use keeprs::storage::adapter::MemoryStorage;
use keeprs::storage::StorageAdapter;
use keeprs::testing::constants::TEST_EMAIL;
use keeprs::testing::{MockReply, MockTransport, TestFixtures};
use keeprs::SessionStore;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn snapshot_starts_in_the_loading_state() {
    let (store, _transport) = TestFixtures::store(TestFixtures::settings());
    let session = store.snapshot();
    assert!(session.initializing);
    assert!(!session.authenticated);
}

#[tokio::test]
async fn subscribers_observe_login_transitions() {
    let (store, transport) = TestFixtures::store(TestFixtures::settings());
    transport.push_login(MockReply::Success(json!({})));
    let mut receiver = store.subscribe();

    let outcome = store.login(json!({"email": TEST_EMAIL})).await;
    assert!(outcome.success);

    // the watch channel collapses intermediate states; the latest value
    // reflects the completed login
    assert!(receiver.has_changed().unwrap());
    let session = receiver.borrow_and_update().clone();
    assert!(session.authenticated);
    assert_eq!(session.profile.unwrap(), TestFixtures::profile());
}

#[tokio::test]
async fn transition_callback_fires_until_guard_drops() {
    let (store, transport) = TestFixtures::store(TestFixtures::settings());
    transport.push_login(MockReply::Success(json!({})));

    let seen: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let guard = store.on_transition(move |session| {
        sink.lock().unwrap().push(session.authenticated);
    });

    let _ = store.login(json!({"email": TEST_EMAIL})).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(
        seen.lock().unwrap().contains(&true),
        "callback observed the authenticated transition"
    );

    drop(guard);
    let count = seen.lock().unwrap().len();
    let _ = store.logout().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.lock().unwrap().len(), count, "guard drop stops delivery");
}

#[tokio::test]
async fn builder_wires_custom_adapter_and_transport() {
    let adapter = Arc::new(MemoryStorage::new());
    let transport = Arc::new(MockTransport::new());
    transport.push_login(MockReply::Success(
        json!({"access_token": "a", "refresh_token": "b"}),
    ));
    // broken cookies force the staged pair into the adapter
    transport.push_profile(MockReply::unauthorized());

    let store = SessionStore::builder(TestFixtures::settings())
        .storage_adapter(Arc::clone(&adapter) as Arc<dyn keeprs::storage::StorageAdapter>)
        .transport(Arc::clone(&transport) as Arc<dyn keeprs::AuthTransport>)
        .build()
        .unwrap();

    let outcome = store.login(json!({"email": TEST_EMAIL})).await;
    assert!(outcome.success);
    assert_eq!(
        adapter.get("keeprs.access_token").as_deref(),
        Some("a"),
        "promoted pair landed in the injected adapter"
    );
    assert!(store.snapshot().authenticated);
}

#[tokio::test]
async fn refresh_driver_requires_a_configured_interval() {
    let (store, _transport) = TestFixtures::store(TestFixtures::settings());
    assert!(store.spawn_refresh_driver().is_none());

    let settings = KeeprsSettings::builder("https://api.example.com")
        .token_refresh_interval_secs(900)
        .build()
        .unwrap();
    let (store, _transport) = TestFixtures::store(settings);
    let driver = store.spawn_refresh_driver();
    assert!(driver.is_some());
    drop(driver); // aborts the task
}

#[tokio::test]
async fn actions_delegate_to_the_engine() {
    let (store, transport) = TestFixtures::store(TestFixtures::settings());
    transport.set_refresh_result(true);

    assert!(store.refresh().await);
    assert!(store.snapshot().authenticated);

    let outcome = store.logout().await;
    assert!(outcome.success);
    assert!(!store.snapshot().authenticated);
    assert_eq!(transport.logout_calls(), 1);
}
