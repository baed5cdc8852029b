use streamkit::{Message, MessageQuery, MessageStore, StoreConfig, TimeRange, TopicFilter};
use tempfile::tempdir;
use time::macros::datetime;

fn store() -> (tempfile::TempDir, MessageStore) {
    let dir = tempdir().expect("tempdir");
    let store = MessageStore::create(StoreConfig::new(dir.path())).expect("create");
    (dir, store)
}

#[test]
fn day_query_returns_only_that_day_in_order() {
    let (_dir, store) = store();
    for (time, text) in [
        (datetime!(2024-01-02 00:00:01 UTC), "next day"),
        (datetime!(2024-01-01 23:59:59 UTC), "late"),
        (datetime!(2024-01-01 00:00:00 UTC), "midnight"),
    ] {
        store
            .insert(&Message::new(time, "app", "INFO", text))
            .expect("insert");
    }

    let range = TimeRange::new(datetime!(2024-01-01 00:00 UTC), datetime!(2024-01-02 00:00 UTC))
        .expect("range");
    let messages = store.query(range).expect("query").to_vec().expect("messages");
    let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["midnight", "late"]);
    assert_eq!(messages[0].time, datetime!(2024-01-01 00:00:00 UTC));
}

#[test]
fn round_trip_preserves_every_field() {
    let (_dir, store) = store();
    let message = Message::new(
        datetime!(2024-06-30 08:15:42.123456789 UTC),
        "app.db.pool",
        "WARNING",
        "connection reset: ünïcödé ✓",
    )
    .with_host("db-7");
    store.insert(&message).expect("insert");

    let found = store
        .query(TimeRange::all())
        .expect("query")
        .to_vec()
        .expect("messages");
    assert_eq!(found, vec![message]);
}

#[test]
fn topic_filters_and_limits() {
    let (_dir, store) = store();
    let base = datetime!(2024-01-01 00:00 UTC);
    let topics = ["app", "app.db", "app.web", "apple", "other"];
    for (i, topic) in topics.iter().enumerate() {
        let time = base + time::Duration::seconds(i as i64);
        store
            .insert(&Message::new(time, *topic, "INFO", *topic))
            .expect("insert");
    }

    let tree = store
        .execute(MessageQuery::new(TimeRange::all()).topic(TopicFilter::tree("app")))
        .expect("query")
        .to_vec()
        .expect("messages");
    let texts: Vec<_> = tree.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["app", "app.db", "app.web"]);

    let exact = store
        .execute(MessageQuery::new(TimeRange::all()).topic(TopicFilter::exact("app")))
        .expect("query")
        .count()
        .expect("count");
    assert_eq!(exact, 1);

    let limited = store
        .execute(MessageQuery::new(TimeRange::all()).limit(2))
        .expect("query")
        .to_vec()
        .expect("messages");
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].topic, "app");

    let unknown = store
        .execute(MessageQuery::new(TimeRange::all()).topic(TopicFilter::exact("missing")))
        .expect("query")
        .count()
        .expect("count");
    assert_eq!(unknown, 0);
}

#[test]
fn snapshot_ignores_later_inserts() {
    let (_dir, store) = store();
    let time = datetime!(2024-01-01 10:00 UTC);
    store
        .insert(&Message::new(time, "app", "INFO", "before"))
        .expect("insert");

    let result = store.query(TimeRange::all()).expect("query");
    store
        .insert(&Message::new(time, "app", "INFO", "after"))
        .expect("insert");
    store
        .insert(&Message::new(datetime!(2024-01-05 10:00 UTC), "app", "INFO", "new chunk"))
        .expect("insert");

    assert_eq!(result.count().expect("count"), 1);
    assert_eq!(result.count().expect("recount"), 1);
    assert_eq!(store.query(TimeRange::all()).expect("query").count().expect("count"), 3);
}

#[test]
fn inverted_range_is_rejected_and_empty_range_is_empty() {
    let (_dir, store) = store();
    let t = datetime!(2024-01-01 00:00 UTC);
    assert!(TimeRange::new(t + time::Duration::seconds(1), t).is_err());

    store
        .insert(&Message::new(t, "app", "INFO", "x"))
        .expect("insert");
    let empty = TimeRange::new(t, t).expect("range");
    assert_eq!(store.query(empty).expect("query").count().expect("count"), 0);
}

#[test]
fn every_storable_time_is_queryable() {
    let (_dir, store) = store();
    let newest = streamkit::timestamp::from_ns(i64::MAX - 1).expect("time");
    let oldest = streamkit::timestamp::from_ns(i64::MIN).expect("time");
    let beyond = streamkit::timestamp::from_ns(i64::MAX).expect("time");

    assert!(matches!(
        store.insert(&Message::new(beyond, "app", "INFO", "unreachable")),
        Err(streamkit::Error::Validation(_))
    ));
    store
        .insert(&Message::new(newest, "app", "INFO", "newest"))
        .expect("insert newest");
    store
        .insert(&Message::new(oldest, "app", "INFO", "oldest"))
        .expect("insert oldest");

    let texts: Vec<_> = store
        .query(TimeRange::all())
        .expect("query")
        .to_vec()
        .expect("messages")
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, ["oldest", "newest"]);
    assert_eq!(store.fetch("app", oldest, 10).expect("fetch").len(), 1);
}
