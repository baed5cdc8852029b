use streamkit::{Message, MessageStore, StoreConfig, TimeRange};
use tempfile::tempdir;
use time::macros::datetime;

#[test]
fn drop_removes_covered_chunk_only() {
    let dir = tempdir().expect("tempdir");
    let store = MessageStore::create(StoreConfig::new(dir.path())).expect("create");
    for (time, text) in [
        (datetime!(2024-01-01 12:00 UTC), "day one"),
        (datetime!(2024-01-02 12:00 UTC), "day two"),
        (datetime!(2024-01-03 12:00 UTC), "day three"),
    ] {
        store
            .insert(&Message::new(time, "app", "INFO", text))
            .expect("insert");
    }

    let day_two = TimeRange::new(datetime!(2024-01-02 00:00 UTC), datetime!(2024-01-03 00:00 UTC))
        .expect("range");
    let dropped = store.drop_range(day_two).expect("drop");
    assert_eq!(dropped.len(), 1);
    assert!(!dropped[0].path.exists());

    let texts: Vec<_> = store
        .query(TimeRange::all())
        .expect("query")
        .to_vec()
        .expect("messages")
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, ["day one", "day three"]);
}

#[test]
fn partial_overlap_drops_nothing() {
    let dir = tempdir().expect("tempdir");
    let store = MessageStore::create(StoreConfig::new(dir.path())).expect("create");
    store
        .insert(&Message::new(datetime!(2024-01-01 12:00 UTC), "app", "INFO", "kept"))
        .expect("insert");

    let half_day =
        TimeRange::new(datetime!(2024-01-01 00:00 UTC), datetime!(2024-01-01 18:00 UTC))
            .expect("range");
    assert!(store.drop_range(half_day).expect("drop").is_empty());
    assert_eq!(store.chunks().expect("chunks").len(), 1);
}

#[test]
fn insert_after_drop_recreates_chunk() {
    let dir = tempdir().expect("tempdir");
    let store = MessageStore::create(StoreConfig::new(dir.path())).expect("create");
    let time = datetime!(2024-01-01 12:00 UTC);
    store
        .insert(&Message::new(time, "app", "INFO", "old"))
        .expect("insert");
    store
        .drop_before(datetime!(2024-01-02 00:00 UTC))
        .expect("drop");

    store
        .insert(&Message::new(time, "app", "INFO", "new"))
        .expect("insert");
    let messages = store
        .query(TimeRange::all())
        .expect("query")
        .to_vec()
        .expect("messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "new");
}

#[test]
fn inflight_query_survives_drop() {
    let dir = tempdir().expect("tempdir");
    let store = MessageStore::create(StoreConfig::new(dir.path())).expect("create");
    store
        .insert(&Message::new(datetime!(2024-01-01 12:00 UTC), "app", "INFO", "x"))
        .expect("insert");

    let result = store.query(TimeRange::all()).expect("query");
    store.drop_range(TimeRange::all()).expect("drop");
    assert_eq!(result.count().expect("count"), 1);
    assert_eq!(store.query(TimeRange::all()).expect("query").count().expect("count"), 0);
}
