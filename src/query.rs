//! Time-range queries over a snapshot of chunks.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::catalog::{Catalog, KeyKind};
use crate::chunk::{ChunkSnapshot, StoredRecord};
use crate::message::{topic_in_tree, Message};
use crate::timestamp::{from_ns, TimeRange};
use crate::Result;

/// Restricts a query to some topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    /// Only this exact topic.
    Exact(String),
    /// The topic and everything nested below it (`app`, `app.db`, ...).
    Tree(String),
}

impl TopicFilter {
    pub fn exact(topic: impl Into<String>) -> Self {
        Self::Exact(topic.into())
    }

    pub fn tree(root: impl Into<String>) -> Self {
        Self::Tree(root.into())
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicFilter::Exact(name) => name == topic,
            TopicFilter::Tree(root) => topic_in_tree(root, topic),
        }
    }
}

/// A time-range query with optional refinements.
#[derive(Debug, Clone)]
pub struct MessageQuery {
    pub(crate) range: TimeRange,
    pub(crate) topic: Option<TopicFilter>,
    pub(crate) limit: Option<usize>,
}

impl MessageQuery {
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            topic: None,
            limit: None,
        }
    }

    pub fn topic(mut self, filter: TopicFilter) -> Self {
        self.topic = Some(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }
}

/// Messages matching a query, pinned to the chunks that existed when the
/// query started.
///
/// Nothing is decoded until iteration; each call to [`QueryResult::iter`]
/// starts over from the first chunk.
pub struct QueryResult {
    range: TimeRange,
    topic_ids: Option<HashSet<u32>>,
    limit: Option<usize>,
    chunks: Vec<ChunkSnapshot>,
    catalog: Arc<Catalog>,
}

impl QueryResult {
    pub(crate) fn new(
        query: MessageQuery,
        chunks: Vec<ChunkSnapshot>,
        catalog: Arc<Catalog>,
    ) -> Result<Self> {
        let topic_ids = match &query.topic {
            None => None,
            Some(filter) => Some(
                catalog
                    .ids_matching(KeyKind::Topic, |name| filter.matches(name))?
                    .into_iter()
                    .collect(),
            ),
        };
        Ok(Self {
            range: query.range,
            topic_ids,
            limit: query.limit,
            chunks,
            catalog,
        })
    }

    pub fn iter(&self) -> MessageIter<'_> {
        MessageIter {
            result: self,
            next_chunk: 0,
            buffered: VecDeque::new(),
            yielded: 0,
            failed: false,
        }
    }

    /// Number of chunks the query touches.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn to_vec(&self) -> Result<Vec<Message>> {
        self.iter().collect()
    }

    /// Count matches without resolving names.
    pub fn count(&self) -> Result<usize> {
        let mut total = 0usize;
        for chunk in &self.chunks {
            total += chunk.read(|time_ns, topic_id| self.keep(time_ns, topic_id))?.len();
            if let Some(limit) = self.limit {
                if total >= limit {
                    return Ok(limit);
                }
            }
        }
        Ok(total)
    }

    fn keep(&self, time_ns: i64, topic_id: u32) -> bool {
        self.range.contains(time_ns)
            && self
                .topic_ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&topic_id))
    }

    fn resolve(&self, record: StoredRecord) -> Result<Message> {
        Ok(Message {
            time: from_ns(record.time_ns)?,
            topic: self.catalog.name(KeyKind::Topic, record.topic_id)?,
            level: self.catalog.name(KeyKind::Level, record.level_id)?,
            host: self.catalog.name(KeyKind::Host, record.host_id)?,
            text: record.text,
        })
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = Result<Message>;
    type IntoIter = MessageIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over a [`QueryResult`], decoding one chunk at a time.
pub struct MessageIter<'a> {
    result: &'a QueryResult,
    next_chunk: usize,
    buffered: VecDeque<StoredRecord>,
    yielded: usize,
    failed: bool,
}

impl Iterator for MessageIter<'_> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = self.result;
        if let Some(limit) = result.limit {
            if self.yielded >= limit {
                return None;
            }
        }

        while self.buffered.is_empty() {
            let chunk = result.chunks.get(self.next_chunk)?;
            self.next_chunk += 1;
            match chunk.read(|time_ns, topic_id| result.keep(time_ns, topic_id)) {
                Ok(records) => self.buffered.extend(records),
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }

        let record = self.buffered.pop_front()?;
        self.yielded += 1;
        let message = result.resolve(record);
        if message.is_err() {
            self.failed = true;
        }
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_filters() {
        assert!(TopicFilter::exact("a").matches("a"));
        assert!(!TopicFilter::exact("a").matches("a.b"));
        assert!(TopicFilter::tree("a").matches("a.b"));
        assert!(!TopicFilter::tree("a").matches("ab"));
    }

    #[test]
    fn query_builder_sets_refinements() {
        let query = MessageQuery::new(TimeRange::all())
            .topic(TopicFilter::tree("app"))
            .limit(5);
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.topic, Some(TopicFilter::Tree("app".into())));
        assert_eq!(query.range(), TimeRange::all());
    }
}
