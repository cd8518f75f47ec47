use std::sync::Arc;
use std::time::Duration;

use remote_runner::runner::cleanup::schedule_eviction;
use remote_runner::runner::{Session, SessionRegistry};

#[test]
fn new_session_starts_empty_and_running() {
    let session = Session::new("cargo test");
    assert_eq!(session.command(), "cargo test");
    assert!(!session.is_complete());
    assert!(!session.stop_requested());
    assert!(session.events().is_empty());
    assert_eq!(session.exit_code(), None);
    assert_eq!(session.pid(), None);

    let summary = session.summary();
    assert_eq!(summary.id, session.id());
    assert_eq!(summary.start_time, session.start_time());
}

#[test]
fn insert_get_and_evict() {
    let registry = SessionRegistry::new();
    assert!(registry.is_empty());

    let session = Arc::new(Session::new("true"));
    let id = session.id().to_owned();
    registry.insert(Arc::clone(&session));

    assert_eq!(registry.len(), 1);
    let found = registry.get(&id).expect("registered");
    assert!(Arc::ptr_eq(&found, &session));

    assert!(registry.evict(&id).is_some());
    assert!(registry.get(&id).is_none());
    assert!(registry.evict(&id).is_none());
    assert!(registry.is_empty());
}

#[test]
fn unknown_token_is_absent() {
    let registry = SessionRegistry::new();
    assert!(registry.get("no-such-session").is_none());
}

#[test]
fn list_is_newest_first() {
    let registry = SessionRegistry::new();
    let older = Arc::new(Session::new("first"));
    std::thread::sleep(Duration::from_millis(5));
    let newer = Arc::new(Session::new("second"));
    registry.insert(Arc::clone(&older));
    registry.insert(Arc::clone(&newer));

    let listed = registry.list();
    let commands: Vec<&str> = listed.iter().map(|s| s.command.as_str()).collect();
    assert_eq!(commands, vec!["second", "first"]);
}

#[test]
fn registries_are_independent() {
    let a = SessionRegistry::new();
    let b = SessionRegistry::new();
    let session = Arc::new(Session::new("true"));
    a.insert(Arc::clone(&session));
    assert!(b.get(session.id()).is_none());
}

#[tokio::test]
async fn scheduled_eviction_removes_after_delay() {
    let registry = Arc::new(SessionRegistry::new());
    let session = Arc::new(Session::new("true"));
    let id = session.id().to_owned();
    registry.insert(session);

    let handle = schedule_eviction(Arc::clone(&registry), id.clone(), Duration::from_millis(50));
    assert!(registry.get(&id).is_some());

    handle.await.expect("eviction task");
    assert!(registry.get(&id).is_none());
}

#[tokio::test]
async fn eviction_of_already_removed_session_is_a_noop() {
    let registry = Arc::new(SessionRegistry::new());
    let handle = schedule_eviction(Arc::clone(&registry), "gone".into(), Duration::ZERO);
    handle.await.expect("eviction task");
    assert!(registry.is_empty());
}
