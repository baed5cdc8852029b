//! Tables reachable from `database check` and `database dump`.
//!
//! `message` is the chunked table. `topic`, `level` and `host` are the
//! catalog, where the name in row `i` has id `i + 1`. `subscriber` and
//! `access` come from the cursor files.

use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;

use crate::access::AccessCursors;
use crate::catalog::KeyKind;
use crate::cli::output::{message_row, MESSAGE_COLUMNS};
use crate::store::MessageStore;
use crate::timestamp::{format_millis, TimeRange};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Table {
    Message,
    Topic,
    Level,
    Host,
    Subscriber,
    Access,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Message,
        Table::Topic,
        Table::Level,
        Table::Host,
        Table::Subscriber,
        Table::Access,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Message => "message",
            Table::Topic => "topic",
            Table::Level => "level",
            Table::Host => "host",
            Table::Subscriber => "subscriber",
            Table::Access => "access",
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Table::Message => &MESSAGE_COLUMNS,
            Table::Topic | Table::Level | Table::Host => &["id", "name"],
            Table::Subscriber => &["name"],
            Table::Access => &["subscriber", "topic", "time"],
        }
    }

    fn key_kind(self) -> Option<KeyKind> {
        match self {
            Table::Topic => Some(KeyKind::Topic),
            Table::Level => Some(KeyKind::Level),
            Table::Host => Some(KeyKind::Host),
            _ => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Number of rows in `table`.
pub fn count(store: &Arc<MessageStore>, table: Table) -> Result<usize> {
    match table {
        Table::Message => store.query(TimeRange::all())?.count(),
        other => Ok(rows(store, other)?.len()),
    }
}

/// Every row of `table` as display strings in [`Table::columns`] order.
pub fn rows(store: &Arc<MessageStore>, table: Table) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    match table.key_kind() {
        Some(kind) => {
            for (index, name) in store.names(kind)?.into_iter().enumerate() {
                rows.push(vec![(index + 1).to_string(), name]);
            }
        }
        None if table == Table::Message => {
            for message in &store.query(TimeRange::all())? {
                rows.push(message_row(&message?));
            }
        }
        None => {
            let cursors = AccessCursors::new(store.clone());
            for subscriber in cursors.subscribers()? {
                if table == Table::Subscriber {
                    rows.push(vec![subscriber]);
                    continue;
                }
                for (topic, time) in cursors.cursors(&subscriber)? {
                    rows.push(vec![subscriber.clone(), topic, format_millis(time)]);
                }
            }
        }
    }
    Ok(rows)
}
