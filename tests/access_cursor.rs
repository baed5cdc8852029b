use std::sync::Arc;

use streamkit::timestamp::from_ns;
use streamkit::{AccessCursors, ManualClock, Message, MessageStore, StoreConfig};
use tempfile::tempdir;
use time::macros::datetime;

#[test]
fn cursors_persist_across_instances() {
    let dir = tempdir().expect("tempdir");
    let config = StoreConfig::new(dir.path());
    let store = Arc::new(MessageStore::create(config.clone()).expect("create"));
    let clock = Arc::new(ManualClock::new(1_000_000_000));

    let access = AccessCursors::with_clock(store.clone(), clock.clone());
    let first = access.latest("audit", "app").expect("latest");
    assert_eq!(first, from_ns(1_000_000_000).expect("time"));

    // The stored value wins over the clock from now on.
    clock.advance(5_000_000_000);
    assert_eq!(access.latest("audit", "app").expect("latest"), first);

    let later = datetime!(2024-01-01 00:00 UTC);
    access.update("audit", "app", later).expect("update");
    access.update("audit", "app.db", later).expect("update");
    access.update("ops", "app", later).expect("update");
    drop(access);
    drop(store);

    let store = Arc::new(MessageStore::open(config).expect("reopen"));
    let access = AccessCursors::new(store);
    assert_eq!(access.get("audit", "app").expect("get"), Some(later));
    assert_eq!(access.subscribers().expect("subscribers"), ["audit", "ops"]);
    let cursors = access.cursors("audit").expect("cursors");
    let topics: Vec<_> = cursors.iter().map(|(topic, _)| topic.as_str()).collect();
    assert_eq!(topics, ["app", "app.db"]);
}

#[test]
fn new_cursor_starts_at_newest_message() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(MessageStore::create(StoreConfig::new(dir.path())).expect("create"));
    let newest = datetime!(2024-02-10 08:00 UTC);
    for time in [datetime!(2024-02-09 08:00 UTC), newest] {
        store
            .insert(&Message::new(time, "app", "INFO", "x"))
            .expect("insert");
    }

    let access = AccessCursors::with_clock(store.clone(), Arc::new(ManualClock::new(0)));
    assert_eq!(access.latest("fresh", "app").expect("latest"), newest);
    assert!(store.fetch("app", newest, 10).expect("fetch").is_empty());
}

#[test]
fn bad_subscriber_names_are_rejected() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(MessageStore::create(StoreConfig::new(dir.path())).expect("create"));
    let access = AccessCursors::new(store);
    assert!(access.get("../escape", "app").is_err());
    assert!(access.get("", "app").is_err());
}
