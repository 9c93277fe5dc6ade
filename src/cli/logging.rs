//! Log output for the CLI: JSON lines to a file, optionally mirrored to
//! stderr in a human-readable form.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use env_logger::{Builder, Env, Logger, Target};
use log::kv::{self, Key, Value, VisitSource};
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde_json::{Map, Value as Json};
use std::fs::OpenOptions;
use std::io::{IsTerminal, Write};
use std::path::Path;

// ANSI color codes
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const MAGENTA: &str = "\x1b[35m";
const RESET: &str = "\x1b[0m";

/// Sends each record to every logger whose filter accepts it.
struct FanOut {
    loggers: Vec<Logger>,
}

impl Log for FanOut {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.loggers.iter().any(|l| l.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        for logger in &self.loggers {
            if logger.matches(record) {
                logger.log(record);
            }
        }
    }

    fn flush(&self) {
        for logger in &self.loggers {
            logger.flush();
        }
    }
}

/// Install the global logger.
///
/// `RUST_LOG`, when set, overrides `level`.
pub fn init(log_file: &Path, console: bool, level: LevelFilter) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    let mut loggers = vec![
        builder(level)
            .format(|buf, record| writeln!(buf, "{}", json_line(record, Utc::now())))
            .target(Target::Pipe(Box::new(file)))
            .build(),
    ];

    if console {
        let color = std::io::stderr().is_terminal();
        loggers.push(
            builder(level)
                .format(move |buf, record| writeln!(buf, "{}", console_line(record, color)))
                .target(Target::Stderr)
                .build(),
        );
    }

    let max_level = loggers
        .iter()
        .map(Logger::filter)
        .max()
        .unwrap_or(LevelFilter::Off);
    log::set_boxed_logger(Box::new(FanOut { loggers })).context("Logger already installed")?;
    log::set_max_level(max_level);
    Ok(())
}

fn builder(level: LevelFilter) -> Builder {
    let mut builder = Builder::new();
    builder.filter_level(level);
    builder.parse_env(Env::default());
    builder
}

/// Collects structured key-values into a JSON object.
struct JsonFields<'a>(&'a mut Map<String, Json>);

impl<'kvs> VisitSource<'kvs> for JsonFields<'_> {
    fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), kv::Error> {
        self.0.insert(key.as_str().to_string(), to_json(&value));
        Ok(())
    }
}

fn to_json(value: &Value) -> Json {
    if let Some(b) = value.to_bool() {
        Json::Bool(b)
    } else if let Some(n) = value.to_i64() {
        Json::from(n)
    } else if let Some(n) = value.to_u64() {
        Json::from(n)
    } else if let Some(n) = value.to_f64() {
        serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number)
    } else {
        Json::String(value.to_string())
    }
}

/// One JSON object per record: timestamp, level, target, message, then
/// the record's key-values.
fn json_line(record: &Record, now: DateTime<Utc>) -> String {
    let mut payload = Map::new();
    payload.insert(
        "timestamp".into(),
        Json::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    payload.insert("level".into(), Json::String(record.level().to_string()));
    payload.insert("target".into(), Json::String(record.target().to_string()));
    payload.insert("message".into(), Json::String(record.args().to_string()));
    let _ = record.key_values().visit(&mut JsonFields(&mut payload));
    Json::Object(payload).to_string()
}

/// Collects key-values as `k=v` strings.
struct Pairs(Vec<String>);

impl<'kvs> VisitSource<'kvs> for Pairs {
    fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), kv::Error> {
        self.0.push(format!("{key}={value}"));
        Ok(())
    }
}

/// `LEVEL    | message | k=v | k=v`
fn console_line(record: &Record, color: bool) -> String {
    let level = format!("{:<8}", record.level());
    let level = if color {
        format!("{}{level}{RESET}", level_color(record.level()))
    } else {
        level
    };

    let mut pairs = Pairs(Vec::new());
    let _ = record.key_values().visit(&mut pairs);

    if pairs.0.is_empty() {
        format!("{level} | {}", record.args())
    } else {
        format!("{level} | {} | {}", record.args(), pairs.0.join(" | "))
    }
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::Error => RED,
        Level::Warn => YELLOW,
        Level::Info => GREEN,
        Level::Debug => CYAN,
        Level::Trace => MAGENTA,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    // ── json_line ────────────────────────────────────────────────────

    #[test]
    fn json_line_has_fields_and_key_values() {
        let kvs = vec![("source", Value::from("a.jpg")), ("confidence", Value::from(0.5))];
        let line = json_line(
            &Record::builder()
                .args(format_args!("Metadata written"))
                .level(Level::Info)
                .target("takeout_merge::pipeline")
                .key_values(&kvs)
                .build(),
            now(),
        );

        let json: Json = serde_json::from_str(&line).unwrap();
        assert_eq!(json["timestamp"], "2024-01-02T03:04:05.000Z");
        assert_eq!(json["level"], "INFO");
        assert_eq!(json["target"], "takeout_merge::pipeline");
        assert_eq!(json["message"], "Metadata written");
        assert_eq!(json["source"], "a.jpg");
        assert_eq!(json["confidence"], 0.5);
    }

    #[test]
    fn json_line_is_single_line() {
        let line = json_line(
            &Record::builder()
                .args(format_args!("multi\nline"))
                .level(Level::Warn)
                .build(),
            now(),
        );
        assert!(!line.contains('\n'));
    }

    // ── console_line ─────────────────────────────────────────────────

    #[test]
    fn console_line_plain() {
        let line = console_line(
            &Record::builder()
                .args(format_args!("Found 3 media file(s)"))
                .level(Level::Info)
                .build(),
            false,
        );
        assert_eq!(line, "INFO     | Found 3 media file(s)");
    }

    #[test]
    fn console_line_with_pairs_and_color() {
        let kvs = vec![("outcome", Value::from("failed"))];
        let line = console_line(
            &Record::builder()
                .args(format_args!("Failed to write metadata"))
                .level(Level::Error)
                .key_values(&kvs)
                .build(),
            true,
        );
        assert_eq!(
            line,
            format!("{RED}ERROR   {RESET} | Failed to write metadata | outcome=failed")
        );
    }
}
