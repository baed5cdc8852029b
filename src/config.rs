//! Layered runtime configuration.
//!
//! Layers are merged depth-first, later ones winning:
//!
//! 1. built-in defaults
//! 2. system file `/etc/streamkit.toml`
//! 3. user file `~/.streamkit/config.toml`
//! 4. local file `./.streamkit/config.toml`
//! 5. environment variables `STREAMKIT_<SECTION>_<KEY>`
//!
//! Any key may instead be given as `<key>_env`, naming an environment
//! variable that holds the value (`root_env = "DATA_DIR"`).

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::{debug, LevelFilter};
use serde::{Deserialize, Deserializer, Serialize};

use crate::interval::Interval;
use crate::publisher::PublisherConfig;
use crate::store::{StoreConfig, DEFAULT_SCHEMA};
use crate::subscriber::SubscriberConfig;
use crate::{Error, Result};

pub const ENV_PREFIX: &str = "STREAMKIT";
const ENV_SUFFIX: &str = "_env";

/// Configuration sections; environment variables naming anything else are
/// ignored.
pub const SECTIONS: [&str; 4] = ["storage", "logging", "publisher", "subscriber"];

pub const LOG_LEVELS: [&str; 5] = ["debug", "info", "warning", "error", "critical"];
pub const LOG_HANDLERS: [&str; 2] = ["standard", "detailed"];

/// A configuration file location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Site {
    System,
    User,
    Local,
}

impl Site {
    pub const ALL: [Site; 3] = [Site::System, Site::User, Site::Local];

    pub fn path(self) -> Option<PathBuf> {
        match self {
            Site::System => {
                if cfg!(windows) {
                    None
                } else {
                    Some(PathBuf::from("/etc/streamkit.toml"))
                }
            }
            Site::User => user_site_dir().map(|dir| dir.join("config.toml")),
            Site::Local => std::env::current_dir()
                .ok()
                .map(|cwd| cwd.join(".streamkit").join("config.toml")),
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Site::System => "system",
            Site::User => "user",
            Site::Local => "local",
        })
    }
}

impl FromStr for Site {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Site::System),
            "user" => Ok(Site::User),
            "local" => Ok(Site::Local),
            other => Err(Error::Config(format!("unknown config site '{other}'"))),
        }
    }
}

#[cfg(windows)]
fn user_site_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("streamkit"))
}

#[cfg(not(windows))]
fn user_site_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".streamkit"))
}

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Default,
    File(Site, PathBuf),
    Env(String),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Default => f.write_str("default"),
            Source::File(site, path) => write!(f, "{site} ({})", path.display()),
            Source::Env(var) => write!(f, "env ({var})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub root: PathBuf,
    pub schema: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_interval: Option<Interval>,
    pub sync_writes: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<Interval>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            schema: DEFAULT_SCHEMA.to_string(),
            chunk_interval: None,
            sync_writes: false,
            retention: None,
        }
    }
}

fn default_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("streamkit"))
        .unwrap_or_else(|| PathBuf::from(".streamkit").join("data"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// Name, or index into [`LOG_LEVELS`].
    #[serde(deserialize_with = "level_or_index")]
    pub level: String,
    pub handler: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warning".to_string(),
            handler: "standard".to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LevelValue {
    Name(String),
    Index(i64),
}

fn level_or_index<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match LevelValue::deserialize(deserializer)? {
        LevelValue::Name(name) => name,
        LevelValue::Index(index) => index.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublisherSection {
    pub batch_size: usize,
    /// Seconds.
    pub timeout: f64,
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            batch_size: crate::publisher::DEFAULT_BATCH_SIZE,
            timeout: crate::publisher::DEFAULT_TIMEOUT.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubscriberSection {
    pub batch_size: usize,
    /// Seconds.
    pub poll: f64,
    /// Seconds; unset waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl Default for SubscriberSection {
    fn default() -> Self {
        Self {
            batch_size: crate::subscriber::DEFAULT_BATCH_SIZE,
            poll: crate::subscriber::DEFAULT_POLL.as_secs_f64(),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub storage: StorageSection,
    pub logging: LoggingSection,
    pub publisher: PublisherSection,
    pub subscriber: SubscriberSection,
}

impl Config {
    /// Load every layer from the usual locations and the process environment.
    pub fn load() -> Result<Self> {
        ConfigLoader::from_environment()?.config()
    }

    /// Validate configuration settings.
    pub fn validate(&self) -> Result<()> {
        let level = self.logging.level.to_ascii_lowercase();
        let known = LOG_LEVELS.contains(&level.as_str())
            || level.parse::<usize>().is_ok_and(|n| n < LOG_LEVELS.len());
        if !known {
            return Err(Error::Config(format!(
                "invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        let handler = self.logging.handler.to_ascii_lowercase();
        if !LOG_HANDLERS.contains(&handler.as_str()) {
            return Err(Error::Config(format!(
                "invalid log handler '{}'. Must be one of: {}",
                self.logging.handler,
                LOG_HANDLERS.join(", ")
            )));
        }

        if self.storage.schema.trim().is_empty() {
            return Err(Error::Config("storage.schema cannot be empty".into()));
        }
        if self.publisher.batch_size == 0 {
            return Err(Error::Config("publisher.batch_size cannot be 0".into()));
        }
        if self.subscriber.batch_size == 0 {
            return Err(Error::Config("subscriber.batch_size cannot be 0".into()));
        }
        seconds("publisher.timeout", self.publisher.timeout)?;
        seconds("subscriber.poll", self.subscriber.poll)?;
        if let Some(timeout) = self.subscriber.timeout {
            seconds("subscriber.timeout", timeout)?;
        }
        Ok(())
    }

    /// Log level filter for `logging.level`; `critical` maps to errors only.
    pub fn log_level(&self) -> LevelFilter {
        let level = self.logging.level.to_ascii_lowercase();
        let index = LOG_LEVELS
            .iter()
            .position(|name| *name == level)
            .or_else(|| level.parse::<usize>().ok())
            .unwrap_or(2);
        match index {
            0 => LevelFilter::Debug,
            1 => LevelFilter::Info,
            2 => LevelFilter::Warn,
            _ => LevelFilter::Error,
        }
    }

    pub fn detailed_logging(&self) -> bool {
        self.logging.handler.eq_ignore_ascii_case("detailed")
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            root: self.storage.root.clone(),
            schema: self.storage.schema.clone(),
            chunk_interval: self.storage.chunk_interval,
            sync_writes: self.storage.sync_writes,
            retention: self.storage.retention,
        }
    }

    pub fn publisher_config(&self) -> Result<PublisherConfig> {
        Ok(PublisherConfig {
            batch_size: self.publisher.batch_size,
            timeout: seconds("publisher.timeout", self.publisher.timeout)?,
            ..PublisherConfig::default()
        })
    }

    pub fn subscriber_config(&self) -> Result<SubscriberConfig> {
        Ok(SubscriberConfig {
            batch_size: self.subscriber.batch_size,
            poll: seconds("subscriber.poll", self.subscriber.poll)?,
            timeout: self
                .subscriber
                .timeout
                .map(|t| seconds("subscriber.timeout", t))
                .transpose()?,
        })
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

fn seconds(key: &str, value: f64) -> Result<Duration> {
    if !(value.is_finite() && value > 0.0) {
        return Err(Error::Config(format!("{key} must be a positive number of seconds")));
    }
    Duration::try_from_secs_f64(value).map_err(|e| Error::Config(format!("{key}: {e}")))
}

/// The individual layers behind a [`Config`].
pub struct ConfigLoader {
    layers: Vec<(Source, toml::Table)>,
    env: HashMap<String, String>,
}

impl ConfigLoader {
    /// Defaults only.
    pub fn new() -> Result<Self> {
        let defaults = match toml::Value::try_from(Config::default()) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => return Err(Error::Config("defaults are not a table".into())),
            Err(e) => return Err(Error::Config(e.to_string())),
        };
        Ok(Self {
            layers: vec![(Source::Default, defaults)],
            env: HashMap::new(),
        })
    }

    /// Defaults, every site file that exists, and the process environment.
    pub fn from_environment() -> Result<Self> {
        let mut loader = Self::new()?;
        for site in Site::ALL {
            if let Some(path) = site.path() {
                if path.exists() {
                    loader.add_file(site, &path)?;
                }
            }
        }
        loader.add_env(std::env::vars())?;
        Ok(loader)
    }

    /// Add a TOML file as the next layer.
    pub fn add_file(&mut self, site: Site, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let table: toml::Table = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
        check_variants(&table)?;
        debug!("loaded {site} configuration from {}", path.display());
        self.layers
            .push((Source::File(site, path.to_path_buf()), table));
        Ok(())
    }

    /// Add `STREAMKIT_<SECTION>_<KEY>` variables, one layer each.
    ///
    /// Only the sections in [`SECTIONS`] are read. Values are read as TOML literals where possible (`10`, `true`, `1.5`)
    /// and as plain strings otherwise. All variables are also kept for
    /// `<key>_env` expansion.
    pub fn add_env(&mut self, vars: impl IntoIterator<Item = (String, String)>) -> Result<()> {
        let mut vars: Vec<(String, String)> = vars.into_iter().collect();
        vars.sort();
        let prefix = format!("{ENV_PREFIX}_");
        for (name, raw) in &vars {
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Some((section, key)) = rest.split_once('_') else {
                continue;
            };
            let section = section.to_ascii_lowercase();
            if key.is_empty() || !SECTIONS.contains(&section.as_str()) {
                debug!("ignoring environment variable {name}");
                continue;
            }
            let mut inner = toml::Table::new();
            inner.insert(key.to_ascii_lowercase(), parse_env_value(raw));
            let mut table = toml::Table::new();
            table.insert(section, toml::Value::Table(inner));
            self.layers.push((Source::Env(name.clone()), table));
        }
        self.env.extend(vars);
        Ok(())
    }

    /// All layers merged, `_env` indirections resolved.
    pub fn merged(&self) -> Result<toml::Table> {
        let mut merged = toml::Table::new();
        for (_, layer) in &self.layers {
            merge(&mut merged, layer.clone());
        }
        self.expand(&mut merged)?;
        Ok(merged)
    }

    pub fn config(&self) -> Result<Config> {
        let config: Config = toml::Value::Table(self.merged()?)
            .try_into()
            .map_err(|e: toml::de::Error| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// The layer that supplies `section.key`, and its raw value.
    pub fn which(&self, dotted: &str) -> Result<Option<(Source, toml::Value)>> {
        let (section, key) = dotted
            .split_once('.')
            .ok_or_else(|| Error::Config(format!("expected SECTION.VAR, got '{dotted}'")))?;
        let env_key = format!("{key}{ENV_SUFFIX}");
        for (source, layer) in self.layers.iter().rev() {
            let Some(table) = layer.get(section).and_then(|v| v.as_table()) else {
                continue;
            };
            if let Some(value) = table.get(key) {
                return Ok(Some((source.clone(), value.clone())));
            }
            if let Some(var) = table.get(&env_key).and_then(|v| v.as_str()) {
                let value = self.env_value(var, dotted)?;
                return Ok(Some((source.clone(), value)));
            }
        }
        Ok(None)
    }

    fn expand(&self, merged: &mut toml::Table) -> Result<()> {
        for (section, value) in merged.iter_mut() {
            let Some(table) = value.as_table_mut() else {
                continue;
            };
            let indirect: Vec<String> = table
                .keys()
                .filter(|key| key.ends_with(ENV_SUFFIX))
                .cloned()
                .collect();
            for key in indirect {
                let Some(toml::Value::String(var)) = table.remove(&key) else {
                    return Err(Error::Config(format!(
                        "{section}.{key} must name an environment variable"
                    )));
                };
                let base = key.trim_end_matches(ENV_SUFFIX).to_string();
                let value = self.env_value(&var, &format!("{section}.{base}"))?;
                table.insert(base, value);
            }
        }
        Ok(())
    }

    fn env_value(&self, var: &str, dotted: &str) -> Result<toml::Value> {
        self.env
            .get(var)
            .map(|raw| parse_env_value(raw))
            .ok_or_else(|| {
                Error::Config(format!(
                    "environment variable {var} (for {dotted}) is not set"
                ))
            })
    }
}

/// Depth-first merge of `overlay` into `base`. Setting `key` or `key_env`
/// replaces whichever variant a lower layer used.
fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match key.strip_suffix(ENV_SUFFIX) {
            Some(plain) => {
                base.remove(plain);
            }
            None => {
                base.remove(&format!("{key}{ENV_SUFFIX}"));
            }
        }
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Reject a layer that sets both `key` and `key_env`.
fn check_variants(layer: &toml::Table) -> Result<()> {
    for (section, value) in layer {
        let Some(table) = value.as_table() else {
            continue;
        };
        for key in table.keys() {
            if let Some(plain) = key.strip_suffix(ENV_SUFFIX) {
                if table.contains_key(plain) {
                    return Err(Error::Config(format!(
                        "more than one variant of {section}.{plain} in configuration file"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn parse_env_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("value = {raw}"))
        .ok()
        .and_then(|mut table| table.remove("value"))
        .filter(|value| !value.is_table())
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

/// Write the default configuration to `site` unless a file already exists.
///
/// Returns the file path.
pub fn init_config(site: Site) -> Result<PathBuf> {
    let path = site
        .path()
        .ok_or_else(|| Error::Config(format!("no {site} configuration path on this platform")))?;
    init_config_at(&path)?;
    Ok(path)
}

pub fn init_config_at(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, Config::default().to_toml()?)?;
    Ok(true)
}
