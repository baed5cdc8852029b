//! Line input for `publish`.

use std::io::BufRead;

use log::info;
use time::OffsetDateTime;

use crate::message::{Message, MessageFields};
use crate::publisher::Publisher;
use crate::store::MessageStore;
use crate::{Error, Result};

/// Publish each line of `source` with surrounding whitespace removed.
///
/// Blank lines are published as empty messages. Returns the number of lines
/// handed to the publisher.
pub fn publish_lines(publisher: &Publisher, source: impl BufRead) -> Result<u64> {
    let mut count = 0;
    for line in source.lines() {
        publisher.write(line?.trim())?;
        count += 1;
    }
    Ok(count)
}

/// Insert one JSON message object per line, `batch_size` at a time.
///
/// Missing topic and level fall back to the given defaults, a missing time is
/// the time the line was read. Blank lines are skipped.
pub fn publish_json(
    store: &MessageStore,
    batch_size: usize,
    topic: &str,
    level: &str,
    source: impl BufRead,
) -> Result<u64> {
    let batch_size = batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    let mut count = 0;
    for (index, line) in source.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields: MessageFields = serde_json::from_str(&line)
            .map_err(|err| Error::validation(format!("line {}: {err}", index + 1)))?;
        fields.topic.get_or_insert_with(|| topic.to_string());
        fields.level.get_or_insert_with(|| level.to_string());
        fields.time.get_or_insert_with(OffsetDateTime::now_utc);
        let message = Message::try_from(fields).map_err(|err| match err {
            Error::Validation(msg) => Error::validation(format!("line {}: {msg}", index + 1)),
            other => other,
        })?;
        batch.push(message);
        if batch.len() == batch_size {
            count += insert(store, &mut batch)?;
        }
    }
    if !batch.is_empty() {
        count += insert(store, &mut batch)?;
    }
    Ok(count)
}

fn insert(store: &MessageStore, batch: &mut Vec<Message>) -> Result<u64> {
    store.insert_batch(batch)?;
    info!("added {} messages", batch.len());
    let added = batch.len() as u64;
    batch.clear();
    Ok(added)
}
