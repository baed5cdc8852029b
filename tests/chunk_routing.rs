use std::collections::HashSet;

use streamkit::{Interval, Message, MessageStore, StoreConfig, TimeRange};
use tempfile::tempdir;
use time::macros::datetime;
use time::Duration;

#[test]
fn messages_across_days_create_one_chunk_per_day() {
    let dir = tempdir().expect("tempdir");
    let store = MessageStore::create(StoreConfig::new(dir.path())).expect("create");

    let base = datetime!(2024-03-01 12:00 UTC);
    let mut chunk_ids = HashSet::new();
    for day in 0..5 {
        for hour in [0, 6, 11] {
            let time = base + Duration::days(day) + Duration::hours(hour);
            let id = store
                .insert(&Message::new(time, "app", "INFO", format!("d{day}h{hour}")))
                .expect("insert");
            chunk_ids.insert(id);
        }
    }

    assert_eq!(chunk_ids.len(), 5);
    let chunks = store.chunks().expect("chunks");
    assert_eq!(chunks.len(), 5);
    assert!(chunks.iter().all(|chunk| chunk.messages == 3));
    assert!(chunks.windows(2).all(|w| w[0].end_ns == w[1].start_ns));
}

#[test]
fn same_day_messages_share_a_chunk() {
    let dir = tempdir().expect("tempdir");
    let store = MessageStore::create(StoreConfig::new(dir.path())).expect("create");

    let a = store
        .insert(&Message::new(datetime!(2024-01-01 00:00 UTC), "app", "INFO", "first"))
        .expect("insert a");
    let b = store
        .insert(&Message::new(datetime!(2024-01-01 23:59:59.999 UTC), "app", "INFO", "last"))
        .expect("insert b");
    assert_eq!(a, b);

    let day = TimeRange::new(datetime!(2024-01-01 00:00 UTC), datetime!(2024-01-02 00:00 UTC))
        .expect("range");
    let result = store.query(day).expect("query");
    assert_eq!(result.chunk_count(), 1);
    assert_eq!(result.count().expect("count"), 2);
}

#[test]
fn custom_interval_partitions_by_hour() {
    let dir = tempdir().expect("tempdir");
    let hour: Interval = "1 hour".parse().expect("interval");
    let store = MessageStore::create(StoreConfig::new(dir.path()).with_chunk_interval(hour))
        .expect("create");

    for minute in (0..180).step_by(30) {
        let time = datetime!(2024-01-01 00:00 UTC) + Duration::minutes(minute);
        store
            .insert(&Message::new(time, "app", "INFO", "tick"))
            .expect("insert");
    }
    assert_eq!(store.chunks().expect("chunks").len(), 3);
    assert_eq!(store.chunk_interval(), hour);
    assert!(store
        .metadata()
        .hypertable_ddl()
        .ends_with("chunk_time_interval => interval '1 hour');"));
}

#[test]
fn times_before_epoch_route_to_negative_chunks() {
    let dir = tempdir().expect("tempdir");
    let store = MessageStore::create(StoreConfig::new(dir.path())).expect("create");

    let id = store
        .insert(&Message::new(datetime!(1969-12-31 23:00 UTC), "app", "INFO", "old"))
        .expect("insert");
    assert_eq!(id.to_string(), "-1");
    let messages = store
        .query(TimeRange::all())
        .expect("query")
        .to_vec()
        .expect("messages");
    assert_eq!(messages[0].text, "old");
}
