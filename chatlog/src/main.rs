//! `chatlog`: inspect and maintain a chat history database.
//!
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/chatlog/config.toml`).
//!
//! ```bash
//! # Newest 20 items of a conversation
//! chatlog history --account me@example.com --conversation bob@example.com --limit 20
//!
//! # Older page, as JSON lines
//! chatlog history --account me@example.com --conversation bob@example.com --before 812 --json
//!
//! # Erase everything stored for an account
//! CHATLOG_DB=/tmp/history.db chatlog clear --account me@example.com
//! ```

use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::path::Path;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use tracing_appender::non_blocking::WorkerGuard;

use chatlog::config::{CliArgs, ClientConfig, Command, ConfigError};
use chatlog::history::{ChatHistory, HistoryError};
use chatlog_proto::message::{AccountId, ConversationId, MessageId, MessageRecord, Timestamp};
use chatlog_proto::state::Direction;

/// Errors that end the program.
#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("failed to encode record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "chatlog failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: CliArgs) -> Result<(), AppError> {
    let config = ClientConfig::load(&cli)?;
    let Some(command) = cli.command else {
        CliArgs::command().print_help()?;
        return Ok(());
    };

    let path = config.database_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let history = ChatHistory::open(&path, config.to_history_settings())?;
    let mut out = io::stdout().lock();

    match command {
        Command::History {
            account,
            conversation,
            before,
            limit,
            json,
        } => {
            let records = history.get_history(
                AccountId::new(account),
                ConversationId::new(conversation),
                before.map(MessageId::from_raw),
                limit.unwrap_or(config.default_page_size),
            )?;
            for record in &records {
                if json {
                    writeln!(out, "{}", serde_json::to_string(record)?)?;
                } else {
                    writeln!(out, "{}", render(record, &config.timestamp_format))?;
                }
            }
        }
        Command::MarkRead {
            account,
            conversation,
        } => {
            let affected = history
                .mark_as_read_sync(AccountId::new(account), ConversationId::new(conversation))?;
            writeln!(out, "marked {affected} item(s) as read")?;
        }
        Command::Clear {
            account,
            conversation,
        } => {
            let affected = history
                .remove_history_sync(AccountId::new(account), conversation.map(ConversationId::new))?;
            writeln!(out, "removed {affected} item(s)")?;
        }
        Command::Schema => {
            writeln!(out, "{}", history.schema_version()?)?;
        }
    }

    history.shutdown();
    Ok(())
}

/// Initialize logging.
///
/// With a log file, output goes through a non-blocking writer and the
/// returned [`WorkerGuard`] must be held until exit so buffered lines are
/// flushed. Without one, logs go to stderr so they never mix with command
/// output.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(log_path) = file_path else {
        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// One line per record: `id  time  state  author: body`.
fn render(record: &MessageRecord, timestamp_format: &str) -> String {
    let author = record
        .author_nickname
        .as_deref()
        .unwrap_or(match record.direction() {
            Direction::Outgoing => "me",
            Direction::Incoming => record.conversation.as_str(),
        });
    let mut line = format!(
        "{:>6}  {}  {:<21}  {author}: {}",
        record.id,
        format_timestamp(record.timestamp, timestamp_format),
        record.state,
        record.body
    );
    if let Some(error) = &record.error {
        let _ = write!(line, "  [{error}]");
    }
    line
}

/// Format a timestamp in local time; falls back to raw milliseconds when the
/// value or the format string is unusable.
fn format_timestamp(ts: Timestamp, format: &str) -> String {
    use chrono::{Local, TimeZone};
    let ms = ts.as_millis();
    let secs = i64::try_from(ms / 1000).unwrap_or(i64::MAX);
    let nsecs = u32::try_from((ms % 1000) * 1_000_000).unwrap_or(0);
    let chrono::LocalResult::Single(dt) = Local.timestamp_opt(secs, nsecs) else {
        return ms.to_string();
    };
    let mut rendered = String::new();
    if write!(rendered, "{}", dt.format(format)).is_err() {
        return ms.to_string();
    }
    rendered
}
