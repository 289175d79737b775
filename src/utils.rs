use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};
use log::{Level, LevelFilter, Metadata, Record};
use std::fs::OpenOptions;
use std::io::{self, LineWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use hangout_sync::models::{Hangout, Message};

// Terminal helpers for the hangout client: logging and line formatting.

/// Where log lines go; stdout is reserved for the conversation
pub enum LogTarget<'a> {
    Stderr,
    File(&'a Path),
}

/// Timestamped line logger. Debug and trace lines also carry `file:line`.
pub struct SimpleLogger {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl SimpleLogger {
    pub fn new(target: LogTarget<'_>) -> Result<Self> {
        let sink: Box<dyn Write + Send> = match target {
            LogTarget::Stderr => Box::new(io::stderr()),
            LogTarget::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Cannot open log file {}", path.display()))?;
                Box::new(LineWriter::new(file))
            }
        };
        Ok(SimpleLogger { sink: Mutex::new(sink) })
    }

    fn format(record: &Record) -> String {
        let now: DateTime<Local> = Local::now();
        let mut line = format!(
            "[{}] {:<5} {}",
            now.format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target()
        );
        if record.level() >= Level::Debug {
            if let (Some(file), Some(number)) = (record.file(), record.line()) {
                line.push_str(&format!(" ({}:{})", file, number));
            }
        }
        line.push_str(&format!(": {}\n", record.args()));
        line
    }
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Self::format(record);
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.flush();
        }
    }
}

/// Read a line of input from stdin, trimming whitespace
pub fn read_line() -> Result<String> {
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

pub fn setup_logging(target: LogTarget<'_>, level: LevelFilter) -> Result<()> {
    let logger = SimpleLogger::new(target)?;
    log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level))?;

    log::info!("Logging initialized at level: {}", level);
    log::info!("{} version {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    Ok(())
}

fn clock(timestamp: i64) -> String {
    Local
        .timestamp_millis_opt(timestamp)
        .single()
        .map(|local| local.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

/// One line per hangout for `/list` and `/unread`
pub fn format_hangout(hangout: &Hangout) -> String {
    let marker = match (hangout.delivered, hangout.read) {
        (_, false) => "*",
        (false, true) => "~",
        (true, true) => " ",
    };
    let preview = hangout
        .message
        .as_ref()
        .map(|m| format!(" \"{}\"", m.text))
        .unwrap_or_default();
    format!(
        "{} [{}] {:<16} {}{}",
        marker,
        clock(hangout.timestamp),
        hangout.peer_id,
        hangout.state,
        preview
    )
}

pub fn format_message(message: &Message, owner: &str) -> String {
    let from_owner = message.owner.as_deref() == Some(owner);
    let status = match (from_owner, message.delivered) {
        (true, true) => "✓",
        (true, false) => "…",
        (false, _) => "",
    };
    let author = if from_owner { "me" } else { message.owner.as_deref().unwrap_or("peer") };
    format!("[{}] {}: {} {}", clock(message.timestamp), author, message.text, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangout_sync::models::{ActionKind, HangoutState};

    #[test]
    fn test_log_line_layout() {
        let info = SimpleLogger::format(
            &Record::builder()
                .args(format_args!("Relay channel open"))
                .level(Level::Info)
                .target("hangout_sync::hangout")
                .file(Some("src/hangout/connection.rs"))
                .line(Some(12))
                .build(),
        );
        assert!(info.ends_with("INFO  hangout_sync::hangout: Relay channel open\n"));

        let debug = SimpleLogger::format(
            &Record::builder()
                .args(format_args!("no replay"))
                .level(Level::Debug)
                .target("hangout_sync::hangout")
                .file(Some("src/hangout/connection.rs"))
                .line(Some(12))
                .build(),
        );
        assert!(debug.contains("(src/hangout/connection.rs:12): no replay"));
    }

    #[test]
    fn test_unread_hangout_is_marked() {
        let hangout = Hangout {
            peer_id: "carol".to_string(),
            peer_email: None,
            state: HangoutState::received(ActionKind::Invite),
            message: None,
            timestamp: 0,
            delivered: true,
            read: false,
        };
        let line = format_hangout(&hangout);
        assert!(line.starts_with('*'));
        assert!(line.contains("carol"));
        assert!(line.contains("INVITER"));
    }
}
