//! CLI output
//!
//! Every command builds a serializable report. With `--json` the report is
//! printed inside a versioned envelope; otherwise a [`Summary`] is rendered:
//! a title, a line of counters, then named groups with one line per book,
//! member or reservation attempt.

use serde::Serialize;

use crate::error::{Error, JsonError, Result};
use crate::model::Book;

pub const SCHEMA_VERSION: &str = "libres.v1";

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Human view of a command's result
#[derive(Debug, Clone, Default)]
pub struct Summary {
    title: String,
    counts: Vec<(String, String)>,
    groups: Vec<Group>,
    notes: Vec<String>,
    try_next: Vec<String>,
}

#[derive(Debug, Clone)]
struct Group {
    heading: String,
    lines: Vec<String>,
}

impl Summary {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn count(&mut self, label: impl Into<String>, value: impl ToString) {
        self.counts.push((label.into(), value.to_string()));
    }

    /// Open `heading` even if no line ends up under it
    pub fn group(&mut self, heading: &str) -> &mut Vec<String> {
        let index = match self.groups.iter().position(|g| g.heading == heading) {
            Some(index) => index,
            None => {
                self.groups.push(Group {
                    heading: heading.to_string(),
                    lines: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        &mut self.groups[index].lines
    }

    pub fn line(&mut self, heading: &str, line: impl Into<String>) {
        self.group(heading).push(line.into());
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// A command worth running next
    pub fn suggest(&mut self, command: impl Into<String>) {
        self.try_next.push(command.into());
    }

    pub fn render(&self) -> String {
        let mut out = self.title.clone();

        if !self.counts.is_empty() {
            let counts: Vec<String> = self
                .counts
                .iter()
                .map(|(label, value)| format!("{label}: {value}"))
                .collect();
            out.push_str("\n  ");
            out.push_str(&counts.join(" | "));
        }

        for group in &self.groups {
            out.push_str("\n\n");
            out.push_str(&group.heading);
            if group.lines.is_empty() {
                out.push_str("\n  (none)");
            }
            for line in &group.lines {
                out.push_str("\n  ");
                out.push_str(line);
            }
        }

        if !self.notes.is_empty() || !self.try_next.is_empty() {
            out.push('\n');
        }
        for note in &self.notes {
            out.push_str("\nnote: ");
            out.push_str(note);
        }
        if !self.try_next.is_empty() {
            out.push_str("\ntry: ");
            out.push_str(&self.try_next.join(", "));
        }
        out
    }
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    summary: Option<&Summary>,
) -> Result<()> {
    if options.json {
        #[derive(Serialize)]
        struct Envelope<'a, T: Serialize> {
            schema_version: &'static str,
            command: &'a str,
            ok: bool,
            data: &'a T,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            notes: Vec<String>,
        }

        let payload = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            ok: true,
            data,
            notes: summary.map(|s| s.notes.clone()).unwrap_or_default(),
        };

        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if options.quiet {
        return Ok(());
    }

    if let Some(summary) = summary {
        println!("{}", summary.render());
    }

    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&failure(command, err))?);
        return Ok(());
    }

    eprintln!("error[{}]: {err}", err.kind());
    if let Some(hint) = hint(err) {
        eprintln!("  hint: {hint}");
    }
    Ok(())
}

#[derive(Serialize)]
struct Failure<'a> {
    schema_version: &'static str,
    command: &'a str,
    ok: bool,
    error: JsonError,
    /// The same request may succeed once the current hold is settled
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'static str>,
}

fn failure<'a>(command: &'a str, err: &Error) -> Failure<'a> {
    Failure {
        schema_version: SCHEMA_VERSION,
        command,
        ok: false,
        error: JsonError::from(err),
        retryable: err.is_contention(),
        hint: hint(err),
    }
}

/// One-line rendering of a book for listings
pub fn format_book(book: &Book) -> String {
    let mut line = format!(
        "ID:{} | Title:{} | Author:{} | Status:{}",
        book.id, book.title, book.author, book.status
    );
    if let Some(reservation) = book.reservation() {
        line.push_str(&format!(
            " | Reserved by {} until {}",
            reservation.member_id,
            reservation.reserved_until.format("%H:%M:%S%.3f")
        ));
    }
    line
}

pub fn infer_command_name_from_args() -> String {
    std::env::args()
        .skip(1)
        .find(|arg| !arg.starts_with('-'))
        .unwrap_or_else(|| "libres".to_string())
}

fn hint(err: &Error) -> Option<&'static str> {
    match err {
        Error::BookNotFound(_) | Error::NotBorrowed(_) => Some("list books with `books`"),
        Error::MemberNotFound(_) => Some("list members with `members`"),
        Error::ReservedByOther { .. } | Error::AlreadyReserved(_) => {
            Some("wait for the reservation to expire, then retry")
        }
        Error::BookNotAvailable(_) => Some("wait for the book to be returned"),
        Error::BookBorrowed(_) => Some("return the book before removing it"),
        Error::InvalidConfig(_) => Some("fix libres.toml then retry"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_counts_groups_and_suggestions() {
        let mut summary = Summary::new("libres demo");
        summary.count("granted", 1);
        summary.count("expired", 0);
        summary.line("Reservations", "Member 1 reserved book 1");
        summary.group("On the shelf");
        summary.line("Reservations", "Member 2 reservation error: taken");
        summary.suggest("libres shell");

        assert_eq!(
            summary.render(),
            "libres demo\n  granted: 1 | expired: 0\n\n\
             Reservations\n  Member 1 reserved book 1\n  Member 2 reservation error: taken\n\n\
             On the shelf\n  (none)\n\n\
             try: libres shell"
        );
    }

    #[test]
    fn render_of_bare_title() {
        assert_eq!(Summary::new("libres init").render(), "libres init");
    }

    #[test]
    fn format_book_shows_reservation() {
        let mut book = Book::new(1, "Concurrency in Go", "K. Author");
        assert_eq!(
            format_book(&book),
            "ID:1 | Title:Concurrency in Go | Author:K. Author | Status:Available"
        );

        book.reserve(2, chrono::Utc::now());
        assert!(format_book(&book).contains("Reserved by 2 until"));
    }

    #[test]
    fn failure_carries_kind_and_retryable() {
        let held = serde_json::to_value(failure(
            "shell",
            &Error::ReservedByOther { book: 1, holder: 2 },
        ))
        .unwrap();
        assert_eq!(held["ok"], false);
        assert_eq!(held["error"]["kind"], "reserved_by_other");
        assert_eq!(held["error"]["code"], 3);
        assert_eq!(held["error"]["details"]["reserved_by"], 2);
        assert_eq!(held["retryable"], true);
        assert!(held["hint"].is_string());

        let stopped = serde_json::to_value(failure("demo", &Error::CenterStopped)).unwrap();
        assert_eq!(stopped["error"]["kind"], "center_stopped");
        assert_eq!(stopped["retryable"], false);
        assert!(stopped.get("hint").is_none());
    }
}
