use std::fs::OpenOptions;
use std::io::Write;

use streamkit::{Error, Message, MessageStore, StoreConfig, TimeRange};
use tempfile::tempdir;
use time::macros::datetime;

#[test]
fn reopen_recovers_chunks_and_names() {
    let dir = tempdir().expect("tempdir");
    let config = StoreConfig::new(dir.path()).with_schema("telemetry");
    {
        let store = MessageStore::create(config.clone()).expect("create");
        for day in 1..=3u8 {
            let time = datetime!(2024-01-01 06:00 UTC) + time::Duration::days(i64::from(day));
            store
                .insert(&Message::new(time, format!("app.n{day}"), "INFO", "hello").with_host("h1"))
                .expect("insert");
        }
        store.sync().expect("sync");
    }

    let store = MessageStore::open(config).expect("reopen");
    assert_eq!(store.chunks().expect("chunks").len(), 3);
    let messages = store.query(TimeRange::all()).expect("query").to_vec().expect("messages");
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2].topic, "app.n3");
    assert_eq!(messages[2].host, "h1");
    assert_eq!(store.topics().expect("topics").len(), 3);

    store
        .insert(&Message::new(datetime!(2024-01-02 07:00 UTC), "app.n1", "INFO", "again"))
        .expect("insert after reopen");
    assert_eq!(store.query(TimeRange::all()).expect("query").count().expect("count"), 4);
}

#[test]
fn torn_tail_is_truncated_on_open() {
    let dir = tempdir().expect("tempdir");
    let config = StoreConfig::new(dir.path());
    let path = {
        let store = MessageStore::create(config.clone()).expect("create");
        store
            .insert(&Message::new(datetime!(2024-01-01 06:00 UTC), "app", "INFO", "whole"))
            .expect("insert");
        store.chunks().expect("chunks")[0].path.clone()
    };
    let clean_len = std::fs::metadata(&path).expect("metadata").len();

    let mut file = OpenOptions::new().append(true).open(&path).expect("open chunk");
    file.write_all(&[0x2a; 19]).expect("write partial header");
    drop(file);

    let store = MessageStore::open(config).expect("reopen");
    assert_eq!(std::fs::metadata(&path).expect("metadata").len(), clean_len);
    let messages = store.query(TimeRange::all()).expect("query").to_vec().expect("messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "whole");
}

#[test]
fn corrupt_committed_record_is_reported() {
    let dir = tempdir().expect("tempdir");
    let store = MessageStore::create(StoreConfig::new(dir.path())).expect("create");
    store
        .insert(&Message::new(datetime!(2024-01-01 06:00 UTC), "app", "INFO", "payload text"))
        .expect("insert");
    let path = store.chunks().expect("chunks")[0].path.clone();

    let mut bytes = std::fs::read(&path).expect("read chunk");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&path, &bytes).expect("write chunk");

    let result = store.query(TimeRange::all()).expect("query");
    let first = result.iter().next().expect("one item");
    assert!(matches!(first, Err(Error::Corrupt(_))));
}

#[test]
fn missing_metadata_fails_open() {
    let dir = tempdir().expect("tempdir");
    assert!(MessageStore::open(StoreConfig::new(dir.path())).is_err());
    assert!(!MessageStore::exists(&StoreConfig::new(dir.path())));
}
