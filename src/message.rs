//! Message records and field validation.

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::timestamp::{self, format_millis};
use crate::{Error, Result};

/// Separator between levels of a topic tree (`app.worker.io`).
pub const TOPIC_SEP: char = '.';

/// A message associates text with metadata about its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub topic: String,
    pub level: String,
    pub host: String,
    pub text: String,
}

impl Message {
    /// New message stamped with the local hostname.
    pub fn new(
        time: OffsetDateTime,
        topic: impl Into<String>,
        level: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            time,
            topic: topic.into(),
            level: level.into(),
            host: local_hostname().to_string(),
            text: text.into(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Message time as nanoseconds since the Unix epoch.
    ///
    /// # Errors
    ///
    /// - `Error::Validation`: the time is outside the storable range
    pub fn time_ns(&self) -> Result<i64> {
        timestamp::to_storable_ns(self.time)
    }

    /// Check every field, returning the time in nanoseconds on success.
    pub fn validate(&self) -> Result<i64> {
        validate_topic(&self.topic)?;
        validate_name("level", &self.level)?;
        validate_name("host", &self.host)?;
        if self.text.contains('\0') {
            return Err(Error::validation("text must not contain NUL"));
        }
        self.time_ns()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            format_millis(self.time),
            self.host,
            self.topic,
            self.level,
            self.text
        )
    }
}

/// Loosely typed message, as decoded from JSON input.
///
/// Every field is optional here; conversion into [`Message`] enforces which
/// ones are required and fills in the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageFields {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub time: Option<OffsetDateTime>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl TryFrom<MessageFields> for Message {
    type Error = Error;

    fn try_from(fields: MessageFields) -> Result<Self> {
        let required = |name: &str, value: Option<String>| {
            value.ok_or_else(|| Error::validation(format!("message.{name} is required")))
        };
        let time = fields
            .time
            .ok_or_else(|| Error::validation("message.time is required"))?;
        let message = Message {
            time,
            topic: required("topic", fields.topic)?,
            level: required("level", fields.level)?,
            host: fields
                .host
                .unwrap_or_else(|| local_hostname().to_string()),
            text: required("text", fields.text)?,
        };
        message.validate()?;
        Ok(message)
    }
}

impl From<Message> for MessageFields {
    fn from(message: Message) -> Self {
        Self {
            time: Some(message.time),
            topic: Some(message.topic),
            level: Some(message.level),
            host: Some(message.host),
            text: Some(message.text),
        }
    }
}

pub fn validate_topic(topic: &str) -> Result<()> {
    validate_name("topic", topic)?;
    if topic.contains('/') || topic.contains('\\') {
        return Err(Error::validation(format!(
            "topic '{topic}' must not contain path separators"
        )));
    }
    if topic.starts_with(TOPIC_SEP) || topic.ends_with(TOPIC_SEP) {
        return Err(Error::validation(format!(
            "topic '{topic}' must not start or end with '{TOPIC_SEP}'"
        )));
    }
    Ok(())
}

fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation(format!("message.{field} must not be empty")));
    }
    if value.contains('\0') {
        return Err(Error::validation(format!("message.{field} must not contain NUL")));
    }
    Ok(())
}

/// True when `topic` is `root` itself or nested below it.
pub fn topic_in_tree(root: &str, topic: &str) -> bool {
    match topic.strip_prefix(root) {
        Some("") => true,
        Some(rest) => rest.starts_with(TOPIC_SEP),
        None => false,
    }
}

/// Hostname of this machine, resolved once.
pub fn local_hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    })
}
