//! Terminal output for forge commands.
//!
//! Colored status lines, build log messages, and human-readable sizes and
//! durations. `--output json` bypasses all of it through `print_json`.

use std::fmt::Display;
use std::time::Duration;

use anyhow::Context;
use assetforge_lib::diagnostics::{LogMessageType, SerializableLogMessage};
use assetforge_lib::storage::ObjectId;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const PLUS: &str = "+";
  pub const MINUS: &str = "-";
}

/// Hex digits of an id shown in listings.
const SHORT_ID_LEN: usize = 12;

/// Leading hex digits of an object id, enough to tell entries apart by eye.
pub fn short_id(id: &ObjectId) -> String {
  let mut text = id.to_string();
  text.truncate(SHORT_ID_LEN);
  text
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

  if bytes < 1024 {
    return format!("{bytes} B");
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit + 1 < UNITS.len() {
    value /= 1024.0;
    unit += 1;
  }
  format!("{value:.1} {}", UNITS[unit])
}

pub fn format_duration(duration: Duration) -> String {
  let millis = duration.as_millis();
  match millis {
    0..1_000 => format!("{millis}ms"),
    1_000..60_000 => format!("{:.2}s", duration.as_secs_f64()),
    _ => {
      let secs = duration.as_secs();
      format!("{}m {}s", secs / 60, secs % 60)
    }
  }
}

#[derive(Clone, Copy)]
enum Tone {
  Success,
  Error,
  Warning,
  Info,
}

fn print_toned(tone: Tone, message: &str) {
  match tone {
    Tone::Success => println!(
      "{} {message}",
      symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green())
    ),
    Tone::Info => println!(
      "{} {message}",
      symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue())
    ),
    Tone::Error => eprintln!(
      "{} {}",
      symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
      message.if_supports_color(Stream::Stderr, |s| s.red())
    ),
    Tone::Warning => eprintln!(
      "{} {}",
      symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
      message.if_supports_color(Stream::Stderr, |s| s.yellow())
    ),
  }
}

pub fn print_success(message: &str) {
  print_toned(Tone::Success, message);
}

pub fn print_error(message: &str) {
  print_toned(Tone::Error, message);
}

pub fn print_warning(message: &str) {
  print_toned(Tone::Warning, message);
}

pub fn print_info(message: &str) {
  print_toned(Tone::Info, message);
}

pub fn print_stat(label: &str, value: impl Display) {
  println!("  {}: {value}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()));
}

/// One `<symbol> <url> <short id>` row of an output or input listing.
pub fn print_object_row(symbol: &str, url: impl Display, id: &ObjectId) {
  println!(
    "  {symbol} {url} {}",
    short_id(id).if_supports_color(Stream::Stdout, |s| s.dimmed())
  );
}

/// Print a build log message at a loudness matching its severity.
pub fn print_log_message(message: &SerializableLogMessage) {
  let text = message.to_string();
  match message.kind {
    kind if kind.is_error() => print_error(&text),
    LogMessageType::Warning => print_warning(&text),
    _ => println!("  {}", text.if_supports_color(Stream::Stdout, |s| s.dimmed())),
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}
