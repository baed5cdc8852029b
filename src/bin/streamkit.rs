use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use log::info;
use time::OffsetDateTime;

use streamkit::cli::editor::editor_command;
use streamkit::cli::input::{publish_json, publish_lines};
use streamkit::cli::logging;
use streamkit::cli::output::{DumpFormat, Tail};
use streamkit::cli::tables::{self, Table};
use streamkit::config::{init_config, ConfigLoader, Site};
use streamkit::timestamp::{self, parse_time};
use streamkit::{
    Config, MessageQuery, MessageStore, Publisher, Subscriber, TimeRange, TopicFilter,
};

#[derive(Parser)]
#[command(name = "streamkit", version, about = "Time-partitioned message store tooling")]
struct Cli {
    /// Storage root (overrides storage.root)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Schema holding the message table (overrides storage.schema)
    #[arg(long, global = true)]
    schema: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish lines of text as messages.
    Publish {
        topic: String,
        level: String,
        /// Input file (default: stdin)
        file: Option<PathBuf>,
        #[arg(short = 'b', long = "batch-size")]
        batch_size: Option<usize>,
        /// Seconds to wait before committing a partial batch
        #[arg(short = 't', long = "timeout")]
        timeout: Option<f64>,
        /// Read one JSON message object per line
        #[arg(long)]
        json: bool,
    },
    /// Print messages on one or more topic trees as they arrive.
    Subscribe {
        name: String,
        #[arg(required = true)]
        topics: Vec<String>,
        #[arg(short = 'b', long = "batch-size")]
        batch_size: Option<usize>,
        /// Seconds between polls
        #[arg(short = 'p', long = "poll-interval")]
        poll: Option<f64>,
        /// Stop after this many seconds without a message
        #[arg(short = 't', long = "timeout")]
        timeout: Option<f64>,
    },
    #[command(subcommand)]
    Database(DatabaseCommands),
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum DatabaseCommands {
    /// Create the message table.
    Init,
    /// Report whether tables exist (default: message).
    Check {
        #[arg(value_enum, value_name = "TBL")]
        tables: Vec<Table>,
        /// Check every table
        #[arg(short = 'a', long = "all", conflicts_with = "tables")]
        all: bool,
        /// Show the row count instead of "exists"
        #[arg(short = 'c', long = "count")]
        count: bool,
    },
    /// List chunks.
    Chunks,
    /// Write the rows of a table; messages come in time order.
    Dump(DumpArgs),
    /// Drop every chunk inside a time range.
    Drop(DropArgs),
    /// Drop chunks older than storage.retention.
    Retain,
}

#[derive(Args)]
struct DumpArgs {
    #[arg(value_enum, default_value_t = Table::Message)]
    table: Table,
    #[arg(long, value_parser = time_arg)]
    start: Option<OffsetDateTime>,
    #[arg(long, value_parser = time_arg)]
    end: Option<OffsetDateTime>,
    /// Topic tree to include
    #[arg(long)]
    topic: Option<String>,
    /// Only the first N rows
    #[arg(long, num_args = 0..=1, default_missing_value = "4", conflicts_with = "tail")]
    head: Option<usize>,
    /// Only the last N rows
    #[arg(long, num_args = 0..=1, default_missing_value = "4")]
    tail: Option<usize>,
    /// Separated values with a header row
    #[arg(long, value_name = "SEP", num_args = 0..=1, default_missing_value = ",")]
    csv: Option<String>,
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

#[derive(Args)]
#[command(group(ArgGroup::new("bounds").required(true).args(["start", "before"])))]
struct DropArgs {
    #[arg(long, value_parser = time_arg, requires = "end", conflicts_with = "before")]
    start: Option<OffsetDateTime>,
    #[arg(long, value_parser = time_arg, requires = "start")]
    end: Option<OffsetDateTime>,
    #[arg(long, value_parser = time_arg)]
    before: Option<OffsetDateTime>,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default configuration file.
    Init {
        #[arg(long, conflicts_with_all = ["system", "local"])]
        user: bool,
        #[arg(long, conflicts_with = "local")]
        system: bool,
        #[arg(long)]
        local: bool,
    },
    /// Open a configuration file in $EDITOR, creating it first if needed.
    Edit {
        #[arg(long, conflicts_with_all = ["system", "local"])]
        user: bool,
        #[arg(long, conflicts_with = "local")]
        system: bool,
        #[arg(long)]
        local: bool,
    },
    /// Show which layer supplies SECTION.VAR.
    Which { key: String },
    /// Print the merged configuration.
    Show,
}

fn time_arg(value: &str) -> std::result::Result<OffsetDateTime, String> {
    parse_time(value).map_err(|err| err.to_string())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let loader = ConfigLoader::from_environment().context("failed to load configuration")?;
    let mut config = loader.config().context("invalid configuration")?;
    if let Some(root) = cli.root {
        config.storage.root = root;
    }
    if let Some(schema) = cli.schema {
        config.storage.schema = schema;
    }
    logging::init(&config);

    let mut out = io::BufWriter::new(io::stdout());
    match cli.command {
        Commands::Publish {
            topic,
            level,
            file,
            batch_size,
            timeout,
            json,
        } => {
            if let Some(size) = batch_size {
                config.publisher.batch_size = size;
            }
            if let Some(timeout) = timeout {
                config.publisher.timeout = timeout;
            }
            cmd_publish(&config, &topic, &level, file, json)?;
        }
        Commands::Subscribe {
            name,
            topics,
            batch_size,
            poll,
            timeout,
        } => {
            if let Some(size) = batch_size {
                config.subscriber.batch_size = size;
            }
            if let Some(poll) = poll {
                config.subscriber.poll = poll;
            }
            if timeout.is_some() {
                config.subscriber.timeout = timeout;
            }
            cmd_subscribe(&config, &name, &topics, &mut out)?;
        }
        Commands::Database(command) => cmd_database(&config, command, &mut out)?,
        Commands::Config(command) => cmd_config(&config, &loader, command, &mut out)?,
    }
    out.flush()?;
    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<MessageStore>> {
    let store_config = config.store_config();
    let root = store_config.table_root();
    let store = MessageStore::open(store_config)
        .with_context(|| format!("failed to open message table at {}", root.display()))?;
    Ok(Arc::new(store))
}

fn input(file: Option<PathBuf>) -> Result<Box<dyn BufRead>> {
    Ok(match file {
        Some(path) => {
            let file = File::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(io::stdin())),
    })
}

fn cmd_publish(
    config: &Config,
    topic: &str,
    level: &str,
    file: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    config.validate()?;
    let store = open_store(config)?;
    let source = input(file)?;
    if json {
        publish_json(&store, config.publisher.batch_size, topic, level, source)?;
        return Ok(());
    }

    let publisher_config = config.publisher_config()?.with_topic(topic).with_level(level);
    let publisher = Publisher::new(store, publisher_config)?;
    publish_lines(&publisher, source)?;
    let stats = publisher.stop()?;
    if stats.failed_messages > 0 {
        bail!(
            "{} of {} messages were not stored",
            stats.failed_messages,
            stats.failed_messages + stats.published
        );
    }
    Ok(())
}

fn cmd_subscribe(
    config: &Config,
    name: &str,
    topics: &[String],
    out: &mut dyn Write,
) -> Result<()> {
    let store = open_store(config)?;
    let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
    let subscriber = Subscriber::new(store, name, &topics, config.subscriber_config()?)?;
    for message in subscriber {
        writeln!(out, "{message}")?;
        out.flush()?;
    }
    Ok(())
}

fn cmd_database(config: &Config, command: DatabaseCommands, out: &mut dyn Write) -> Result<()> {
    match command {
        DatabaseCommands::Init => {
            let store_config = config.store_config();
            if MessageStore::exists(&store_config) {
                let store = open_store(config)?;
                writeln!(out, "already initialized: {}", store.table_root().display())?;
            } else {
                let store = MessageStore::create(store_config)?;
                info!("{}", store.metadata().hypertable_ddl());
                writeln!(out, "created: {}", store.table_root().display())?;
            }
        }
        DatabaseCommands::Check {
            tables: requested,
            all,
            count,
        } => {
            let names = if all {
                Table::ALL.to_vec()
            } else if requested.is_empty() {
                vec![Table::Message]
            } else {
                requested
            };
            let store = if MessageStore::exists(&config.store_config()) {
                Some(open_store(config)?)
            } else {
                None
            };
            for table in names {
                match &store {
                    None => writeln!(out, "{table}: missing")?,
                    Some(store) if count => {
                        writeln!(out, "{table}: {}", tables::count(store, table)?)?
                    }
                    Some(_) => writeln!(out, "{table}: exists")?,
                }
            }
        }
        DatabaseCommands::Chunks => {
            let store = open_store(config)?;
            for chunk in store.chunks()? {
                writeln!(out, "{chunk}")?;
            }
        }
        DatabaseCommands::Dump(args) => cmd_dump(config, args, out)?,
        DatabaseCommands::Drop(args) => {
            let store = open_store(config)?;
            let dropped = match (args.start, args.end, args.before) {
                (Some(start), Some(end), None) => store.drop_range(TimeRange::new(start, end)?)?,
                (None, None, Some(before)) => store.drop_before(before)?,
                _ => bail!("use either --start and --end, or --before"),
            };
            report_dropped(&dropped, out)?;
        }
        DatabaseCommands::Retain => {
            let store = open_store(config)?;
            if store.config().retention.is_none() {
                bail!("storage.retention is not configured");
            }
            let dropped = store.enforce_retention(OffsetDateTime::now_utc())?;
            report_dropped(&dropped, out)?;
        }
    }
    Ok(())
}

fn report_dropped(dropped: &[streamkit::ChunkInfo], out: &mut dyn Write) -> Result<()> {
    for chunk in dropped {
        writeln!(out, "dropped {chunk}")?;
    }
    writeln!(out, "dropped {} chunks", dropped.len())?;
    Ok(())
}

fn cmd_dump(config: &Config, args: DumpArgs, out: &mut dyn Write) -> Result<()> {
    let store = open_store(config)?;
    if args.table != Table::Message
        && (args.start.is_some() || args.end.is_some() || args.topic.is_some())
    {
        bail!("--start, --end and --topic only apply to the message table");
    }

    let mut file_out;
    let out: &mut dyn Write = match &args.output {
        Some(path) => {
            file_out = io::BufWriter::new(
                File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
            );
            &mut file_out
        }
        None => out,
    };

    let format = match &args.csv {
        Some(sep) => DumpFormat::csv(sep)?,
        None => DumpFormat::Plain,
    };
    let mut writer = format.writer(out);
    writer.write_header(args.table.columns())?;

    if args.table != Table::Message {
        let rows = tables::rows(&store, args.table)?;
        let skip = match args.tail {
            Some(limit) => rows.len().saturating_sub(limit),
            None => 0,
        };
        let take = args.head.unwrap_or(usize::MAX);
        for row in rows.iter().skip(skip).take(take) {
            writer.write_row(row)?;
        }
        writer.flush()?;
        return Ok(());
    }

    let start_ns = args.start.map(timestamp::to_ns).transpose()?.unwrap_or(i64::MIN);
    let end_ns = args.end.map(timestamp::to_ns).transpose()?.unwrap_or(i64::MAX);
    let mut query = MessageQuery::new(TimeRange::from_ns(start_ns, end_ns)?);
    if let Some(topic) = args.topic {
        query = query.topic(TopicFilter::tree(topic));
    }
    if let Some(head) = args.head {
        query = query.limit(head);
    }
    let result = store.execute(query)?;
    match args.tail {
        Some(limit) => {
            let mut tail = Tail::new(limit);
            for message in &result {
                tail.push(message?);
            }
            for message in tail.into_items() {
                writer.write_message(&message)?;
            }
        }
        None => {
            for message in &result {
                writer.write_message(&message?)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

fn config_site(user: bool, system: bool, local: bool) -> Site {
    match (user, system, local) {
        (false, true, _) => Site::System,
        (false, _, true) => Site::Local,
        _ => Site::User,
    }
}

fn cmd_config(
    config: &Config,
    loader: &ConfigLoader,
    command: ConfigCommands,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        ConfigCommands::Init {
            user,
            system,
            local,
        } => {
            let path = init_config(config_site(user, system, local))?;
            writeln!(out, "{}", path.display())?;
        }
        ConfigCommands::Edit {
            user,
            system,
            local,
        } => {
            let path = init_config(config_site(user, system, local))?;
            let editor = std::env::var("EDITOR").ok();
            let status = editor_command(editor.as_deref(), &path)?
                .status()
                .context("failed to start editor")?;
            if !status.success() {
                bail!("editor exited with {status}");
            }
        }
        ConfigCommands::Which { key } => match loader.which(&key)? {
            Some((source, value)) => writeln!(out, "{value}  # {source}")?,
            None => bail!("{key} is not set"),
        },
        ConfigCommands::Show => write!(out, "{}", config.to_toml()?)?,
    }
    Ok(())
}
