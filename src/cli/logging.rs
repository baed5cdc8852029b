//! Console logging for the command line tools.

use std::io::Write;

use env_logger::fmt::Formatter;
use log::Record;
use time::OffsetDateTime;

use crate::config::Config;
use crate::log_sink::level_name;
use crate::message::local_hostname;
use crate::timestamp::format_millis;

/// `LEVEL    target: message`
pub fn standard_line(record: &Record<'_>) -> String {
    format!(
        "{:<8} {}: {}",
        level_name(record.level()),
        record.target(),
        record.args()
    )
}

/// `timestamp host LEVEL [target] message`
pub fn detailed_line(record: &Record<'_>, now: OffsetDateTime) -> String {
    format!(
        "{} {} {:<8} [{}] {}",
        format_millis(now),
        local_hostname(),
        level_name(record.level()),
        record.target(),
        record.args()
    )
}

/// Install `env_logger` on stderr with the configured level and handler.
///
/// Does nothing if a logger is already installed.
pub fn init(config: &Config) {
    let detailed = config.detailed_logging();
    let _ = env_logger::Builder::new()
        .filter_level(config.log_level())
        .format(move |buf: &mut Formatter, record: &Record<'_>| {
            let line = if detailed {
                detailed_line(record, OffsetDateTime::now_utc())
            } else {
                standard_line(record)
            };
            writeln!(buf, "{line}")
        })
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use time::macros::datetime;

    #[test]
    fn formats_both_handlers() {
        let render = |detailed: bool| {
            let record = Record::builder()
                .level(Level::Warn)
                .target("streamkit::store")
                .args(format_args!("disk full"))
                .build();
            if detailed {
                detailed_line(&record, datetime!(2024-01-01 12:00:00.250 UTC))
            } else {
                standard_line(&record)
            }
        };
        assert_eq!(render(false), "WARNING  streamkit::store: disk full");

        let line = render(true);
        assert!(line.starts_with("2024-01-01 12:00:00.250 "));
        assert!(line.ends_with(" WARNING  [streamkit::store] disk full"));
    }
}
