//! Progress and annotation output for the enclosing automation platform.
//!
//! Plain progress lines go to stdout; warnings and errors are additionally
//! emitted as `::warning`/`::error` workflow-command annotations so the
//! platform surfaces them in run summaries. The sink is a trait so the
//! lifecycle loops can run under test with a recording implementation.

/// Format a workflow-command annotation line.
pub fn format_annotation(kind: &str, title: &str, message: &str) -> String {
    format!("::{kind} title={title}::{message}")
}

/// Sink for user-visible progress and annotations.
pub trait Reporter: Send + Sync {
    /// Plain progress line.
    fn progress(&self, message: &str);

    /// Non-fatal problem, surfaced as a `::warning` annotation.
    fn warning(&self, title: &str, message: &str);

    /// Fatal problem, surfaced as both a plain line and an `::error`
    /// annotation so it is visible in raw logs and rendered summaries.
    fn error(&self, title: &str, message: &str);
}

/// Reporter that writes to the process stdout/stderr.
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn progress(&self, message: &str) {
        println!("{message}");
    }

    fn warning(&self, title: &str, message: &str) {
        println!("{}", format_annotation("warning", title, message));
    }

    fn error(&self, title: &str, message: &str) {
        eprintln!("{title}: {message}");
        println!("{}", format_annotation("error", title, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_format() {
        assert_eq!(
            format_annotation("warning", "Test Title", "Test Message"),
            "::warning title=Test Title::Test Message"
        );
    }

    #[test]
    fn test_error_format_with_special_chars() {
        assert_eq!(
            format_annotation("error", "Test:Title", "Test,Message"),
            "::error title=Test:Title::Test,Message"
        );
    }
}
