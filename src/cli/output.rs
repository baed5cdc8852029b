//! Row rendering for `subscribe` and `database dump`.

use std::collections::VecDeque;
use std::io::{self, Write};

use crate::message::Message;
use crate::timestamp::format_millis;
use crate::{Error, Result};

pub const MESSAGE_COLUMNS: [&str; 5] = ["time", "host", "topic", "level", "text"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    /// Space separated, no header; the layout `subscribe` prints.
    Plain,
    /// Delimited values with a header row.
    Csv(u8),
}

impl DumpFormat {
    /// CSV with a single-byte delimiter.
    pub fn csv(sep: &str) -> Result<Self> {
        match sep.as_bytes() {
            [byte] => Ok(DumpFormat::Csv(*byte)),
            _ => Err(Error::validation(format!(
                "CSV separator must be a single byte, got '{sep}'"
            ))),
        }
    }

    pub fn writer<W: Write>(self, out: W) -> RowWriter<W> {
        match self {
            DumpFormat::Plain => RowWriter::Plain(out),
            DumpFormat::Csv(delimiter) => RowWriter::Csv(
                csv::WriterBuilder::new()
                    .delimiter(delimiter)
                    .has_headers(false)
                    .from_writer(out),
            ),
        }
    }
}

pub enum RowWriter<W: Write> {
    Plain(W),
    Csv(csv::Writer<W>),
}

impl<W: Write> RowWriter<W> {
    /// Column names; plain output has no header.
    pub fn write_header(&mut self, columns: &[&str]) -> io::Result<()> {
        match self {
            RowWriter::Plain(_) => Ok(()),
            RowWriter::Csv(writer) => Ok(writer.write_record(columns)?),
        }
    }

    pub fn write_row(&mut self, fields: &[String]) -> io::Result<()> {
        match self {
            RowWriter::Plain(out) => writeln!(out, "{}", fields.join(" ")),
            RowWriter::Csv(writer) => Ok(writer.write_record(fields)?),
        }
    }

    pub fn write_message(&mut self, message: &Message) -> io::Result<()> {
        self.write_row(&message_row(message))
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            RowWriter::Plain(out) => out.flush(),
            RowWriter::Csv(writer) => writer.flush(),
        }
    }
}

/// Fields of `message` in [`MESSAGE_COLUMNS`] order.
pub fn message_row(message: &Message) -> Vec<String> {
    vec![
        format_millis(message.time),
        message.host.clone(),
        message.topic.clone(),
        message.level.clone(),
        message.text.clone(),
    ]
}

/// Keeps the last `limit` items pushed.
#[derive(Debug)]
pub struct Tail<T> {
    items: VecDeque<T>,
    limit: usize,
}

impl<T> Tail<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(limit.min(1024)),
            limit,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.limit == 0 {
            return;
        }
        if self.items.len() == self.limit {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn into_items(self) -> impl Iterator<Item = T> {
        self.items.into_iter()
    }
}
