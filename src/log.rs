use chrono::{DateTime, Local};
use owo_colors::{OwoColorize, Stream::Stdout};
use std::fmt::Display;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    fn prefix(self) -> &'static str {
        match self {
            Severity::Info => "",
            Severity::Warn => "WARN: ",
            Severity::Error => "ERROR: ",
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Render one console line. `tag` is the server name, or `None` for daemon-wide messages.
pub fn format_line(at: DateTime<Local>, tag: Option<&str>, message: &str) -> String {
    let time = at.format("%H:%M:%S");
    match tag {
        Some(name) => format!("[ {time} ] [ {name} ] {message}"),
        None => format!("[ {time} ] {message}"),
    }
}

fn emit(tag: Option<&str>, severity: Severity, message: impl Display) {
    let prefix = severity.prefix();
    let prefix = match severity {
        Severity::Info => prefix.to_string(),
        Severity::Warn => prefix
            .if_supports_color(Stdout, |p| p.yellow())
            .to_string(),
        Severity::Error => prefix.if_supports_color(Stdout, |p| p.red()).to_string(),
    };
    println!(
        "{}",
        format_line(Local::now(), tag, &format!("{prefix}{message}"))
    );
}

// ---------------------------------------------------------------------------
// Server-tagged lines
// ---------------------------------------------------------------------------

pub fn info(server: &str, message: impl Display) {
    emit(Some(server), Severity::Info, message);
}

pub fn warn(server: &str, message: impl Display) {
    emit(Some(server), Severity::Warn, message);
}

pub fn error(server: &str, message: impl Display) {
    emit(Some(server), Severity::Error, message);
}

// ---------------------------------------------------------------------------
// Daemon lines
// ---------------------------------------------------------------------------

pub fn daemon(message: impl Display) {
    emit(None, Severity::Info, message);
}

pub fn daemon_warn(message: impl Display) {
    emit(None, Severity::Warn, message);
}

pub fn daemon_error(message: impl Display) {
    emit(None, Severity::Error, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, h, m, s).unwrap()
    }

    #[test]
    fn test_server_line_has_time_and_tag() {
        let line = format_line(at(7, 5, 3), Some("Valheim"), "Closing server now...");
        assert_eq!(line, "[ 07:05:03 ] [ Valheim ] Closing server now...");
    }

    #[test]
    fn test_daemon_line_has_no_tag() {
        let line = format_line(at(23, 59, 0), None, "Starting runtime...");
        assert_eq!(line, "[ 23:59:00 ] Starting runtime...");
    }

    #[test]
    fn test_severity_prefixes() {
        assert_eq!(Severity::Info.prefix(), "");
        assert_eq!(Severity::Warn.prefix(), "WARN: ");
        assert_eq!(Severity::Error.prefix(), "ERROR: ");
    }
}
