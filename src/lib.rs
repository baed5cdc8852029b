//! Time-partitioned persisted message store with publish/subscribe.
//!
//! Messages land in one `message` table per schema. The table is split into
//! fixed-width time chunks, each an append-only file of checksummed records,
//! so queries touch only the chunks their range overlaps and old data is
//! dropped a whole chunk at a time.

pub mod access;
pub mod catalog;
pub mod chunk;
pub mod clock;
pub mod config;
pub mod error;
pub mod header;
pub mod interval;
pub mod log_sink;
pub mod message;
pub mod metadata;
pub mod mmap;
pub mod publisher;
pub mod query;
pub mod store;
pub mod subscriber;
pub mod timestamp;
mod wait;

#[cfg(feature = "cli")]
pub mod cli;

pub use access::AccessCursors;
pub use chunk::{ChunkId, ChunkInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use interval::Interval;
pub use log_sink::PublisherLogger;
pub use message::{Message, MessageFields};
pub use publisher::{Publisher, PublisherConfig, PublisherStats};
pub use query::{MessageQuery, QueryResult, TopicFilter};
pub use store::{MessageStore, StoreConfig};
pub use subscriber::{Subscriber, SubscriberConfig};
pub use timestamp::TimeRange;
