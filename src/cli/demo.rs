//! libres demo command implementation
//!
//! Seeds the catalog, lets every member race for book 1 at once, waits for
//! the reservation timers to settle and prints the final state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::library::{Library, LibraryStats};
use crate::model::{Book, BookId, MemberId};
use crate::output::{emit_success, format_book, OutputOptions, Summary};

/// The contested book
const DEMO_BOOK: BookId = 1;

/// How often the settle loop checks for pending timers
const SETTLE_POLL: Duration = Duration::from_millis(50);

pub struct DemoOptions {
    pub config: Config,
    pub members: Option<usize>,
    pub output: OutputOptions,
}

#[derive(Debug, Serialize)]
struct DemoReport {
    book_id: BookId,
    attempts: Vec<Attempt>,
    available: Vec<Book>,
    borrowed: Vec<Loans>,
    stats: LibraryStats,
}

#[derive(Debug, Serialize)]
struct Attempt {
    member_id: MemberId,
    #[serde(skip_serializing_if = "Option::is_none")]
    reserved_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct Loans {
    member_id: MemberId,
    name: String,
    books: Vec<Book>,
}

pub fn run(opts: DemoOptions) -> Result<()> {
    let runtime = super::runtime()?;
    let report = runtime.block_on(simulate(&opts.config, opts.members))?;

    let mut summary = Summary::new(format!(
        "libres demo: concurrent reservations for book {}",
        report.book_id
    ));
    summary.count("contenders", report.attempts.len());
    summary.count(
        "granted",
        report.attempts.iter().filter(|a| a.error.is_none()).count(),
    );
    summary.count("expired", report.stats.timers.expired);
    summary.count("auto-borrowed", report.stats.timers.auto_borrowed);

    for attempt in &report.attempts {
        let line = match &attempt.error {
            None => format!("Member {} reserved book {}", attempt.member_id, report.book_id),
            Some(err) => format!("Member {} reservation error: {}", attempt.member_id, err),
        };
        summary.line("Reservations", line);
    }
    summary
        .group("On the shelf")
        .extend(report.available.iter().map(format_book));
    let on_loan = summary.group("On loan");
    for loans in &report.borrowed {
        for book in &loans.books {
            on_loan.push(format!(
                "Member {} ({}) -> ID:{} | {}",
                loans.member_id, loans.name, book.id, book.title
            ));
        }
    }

    emit_success(opts.output, "demo", &report, Some(&summary))
}

async fn simulate(config: &Config, limit: Option<usize>) -> Result<DemoReport> {
    let library = Arc::new(Library::new(config)?);
    library.seed(&config.catalog);
    library.start()?;

    let contenders: Vec<MemberId> = library
        .list_members()
        .iter()
        .map(|m| m.id)
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    let mut tasks = JoinSet::new();
    for member in contenders {
        let library = Arc::clone(&library);
        tasks.spawn(async move { (member, library.reserve_book(DEMO_BOOK, member).await) });
    }

    let mut attempts = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (member_id, outcome) = joined
            .map_err(|err| Error::OperationFailed(format!("reservation task failed: {err}")))?;
        attempts.push(match outcome {
            Ok(reservation) => Attempt {
                member_id,
                reserved_until: Some(reservation.reserved_until),
                error: None,
            },
            Err(err) => Attempt {
                member_id,
                reserved_until: None,
                error: Some(err.to_string()),
            },
        });
    }
    attempts.sort_by_key(|a| a.member_id);

    let window = config.reservations.window()?.to_std().unwrap_or(Duration::ZERO);
    settle(&library, window + Duration::from_secs(1)).await;

    let available = library.list_available_books();
    let borrowed = library
        .list_members()
        .into_iter()
        .filter(|m| !m.borrowed.is_empty())
        .map(|m| Loans {
            member_id: m.id,
            name: m.name,
            books: m.borrowed,
        })
        .collect();

    library.shutdown().await;

    Ok(DemoReport {
        book_id: DEMO_BOOK,
        attempts,
        available,
        borrowed,
        stats: library.stats(),
    })
}

/// Wait until no reservation timer is pending, or `limit` has passed
async fn settle(library: &Library, limit: Duration) {
    let waited = tokio::time::timeout(limit, async {
        while library.outstanding_timers() > 0 {
            tokio::time::sleep(SETTLE_POLL).await;
        }
    })
    .await;
    if waited.is_err() {
        tracing::warn!(
            outstanding = library.outstanding_timers(),
            "timers still pending after the settle limit"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_three_members_one_winner() {
        let mut config = Config::default();
        config.reservations.claim.mode = "never".to_string();

        let report = simulate(&config, None).await.unwrap();
        assert_eq!(report.attempts.len(), 3);
        let winners = report.attempts.iter().filter(|a| a.error.is_none()).count();
        assert_eq!(winners, 1);

        // the reservation expired, so both books are back on the shelf
        assert_eq!(report.available.len(), 2);
        assert!(report.borrowed.is_empty());
        assert_eq!(report.stats.timers.expired, 1);
        assert_eq!(report.stats.timers.outstanding, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_claim_ends_borrowed() {
        let mut config = Config::default();
        config.reservations.claim.mode = "after".to_string();
        config.reservations.claim.after = "1s".to_string();

        let report = simulate(&config, Some(2)).await.unwrap();
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.available.len(), 1);
        assert_eq!(report.borrowed.len(), 1);
        assert_eq!(report.borrowed[0].books[0].id, DEMO_BOOK);
    }
}
