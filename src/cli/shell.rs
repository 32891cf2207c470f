//! libres shell command implementation
//!
//! A line-oriented console. Each line is one command; arguments containing
//! spaces go in double quotes:
//!
//! ```text
//! add-book "Dune" "F. Herbert"
//! reserve 3 1
//! borrowed 1
//! ```
//!
//! Errors are printed and the session continues.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::str::FromStr;

use tokio::runtime::Runtime;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::library::Library;
use crate::model::{BookId, MemberId};
use crate::output::format_book;

pub struct ShellOptions {
    pub config: Config,
    pub quiet: bool,
}

const HELP: &str = "\
Commands:
  add-book \"<title>\" \"<author>\"   add a book
  remove-book <book>               remove a book that is not borrowed
  add-member \"<name>\"             add a member
  borrow <book> <member>           borrow a book
  return <book> <member>           return a borrowed book
  reserve <book> <member>          reserve a book for a limited time
  available                        list books free to borrow
  borrowed <member>                list books a member holds
  books                            list all books
  members                          list all members
  stats                            show reservation counters
  help                             show this help
  quit                             leave the shell";

/// One parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    AddBook { title: String, author: String },
    RemoveBook(BookId),
    AddMember(String),
    Borrow { book: BookId, member: MemberId },
    Return { book: BookId, member: MemberId },
    Reserve { book: BookId, member: MemberId },
    Available,
    Borrowed(MemberId),
    Books,
    Members,
    Stats,
    Help,
    Quit,
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShellCommand::AddBook { .. } => "add-book",
            ShellCommand::RemoveBook(_) => "remove-book",
            ShellCommand::AddMember(_) => "add-member",
            ShellCommand::Borrow { .. } => "borrow",
            ShellCommand::Return { .. } => "return",
            ShellCommand::Reserve { .. } => "reserve",
            ShellCommand::Available => "available",
            ShellCommand::Borrowed(_) => "borrowed",
            ShellCommand::Books => "books",
            ShellCommand::Members => "members",
            ShellCommand::Stats => "stats",
            ShellCommand::Help => "help",
            ShellCommand::Quit => "quit",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ShellCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let tokens = tokenize(line)?;
        let Some((name, args)) = tokens.split_first() else {
            return Err(Error::InvalidArgument("empty command".to_string()));
        };

        let command = match name.to_lowercase().as_str() {
            "add-book" => {
                let [title, author] = expect_args(name, args, ["title", "author"])?;
                ShellCommand::AddBook { title, author }
            }
            "remove-book" => {
                let [book] = expect_args(name, args, ["book"])?;
                ShellCommand::RemoveBook(parse_id(&book, "book")?)
            }
            "add-member" => {
                let [member] = expect_args(name, args, ["name"])?;
                ShellCommand::AddMember(member)
            }
            "borrow" => {
                let (book, member) = book_and_member(name, args)?;
                ShellCommand::Borrow { book, member }
            }
            "return" => {
                let (book, member) = book_and_member(name, args)?;
                ShellCommand::Return { book, member }
            }
            "reserve" => {
                let (book, member) = book_and_member(name, args)?;
                ShellCommand::Reserve { book, member }
            }
            "available" => no_args(name, args, ShellCommand::Available)?,
            "borrowed" => {
                let [member] = expect_args(name, args, ["member"])?;
                ShellCommand::Borrowed(parse_id(&member, "member")?)
            }
            "books" => no_args(name, args, ShellCommand::Books)?,
            "members" => no_args(name, args, ShellCommand::Members)?,
            "stats" => no_args(name, args, ShellCommand::Stats)?,
            "help" | "?" => ShellCommand::Help,
            "quit" | "exit" => ShellCommand::Quit,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown command '{other}' (try 'help')"
                )))
            }
        };
        Ok(command)
    }
}

/// Split a console line into words, honouring double quotes
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quoted {
        return Err(Error::InvalidArgument("unterminated quote".to_string()));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn expect_args<const N: usize>(
    command: &str,
    args: &[String],
    names: [&str; N],
) -> Result<[String; N]> {
    <[String; N]>::try_from(args.to_vec()).map_err(|_| {
        let usage: Vec<String> = names.iter().map(|n| format!("<{n}>")).collect();
        Error::InvalidArgument(format!("usage: {} {}", command, usage.join(" ")))
    })
}

fn no_args(command: &str, args: &[String], parsed: ShellCommand) -> Result<ShellCommand> {
    if !args.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "'{command}' takes no arguments"
        )));
    }
    Ok(parsed)
}

fn book_and_member(command: &str, args: &[String]) -> Result<(BookId, MemberId)> {
    let [book, member] = expect_args(command, args, ["book", "member"])?;
    Ok((parse_id(&book, "book")?, parse_id(&member, "member")?))
}

fn parse_id(raw: &str, what: &str) -> Result<u32> {
    raw.parse()
        .map_err(|_| Error::InvalidArgument(format!("invalid {what} id '{raw}'")))
}

pub fn run(opts: ShellOptions) -> Result<()> {
    let runtime = super::runtime()?;
    let library = Library::new(&opts.config)?;
    library.seed(&opts.config.catalog);
    {
        let _enter = runtime.enter();
        library.start()?;
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let result = run_session(&runtime, &library, stdin.lock(), &mut stdout, !opts.quiet);

    runtime.block_on(library.shutdown());
    result.map(|_| ())
}

/// Run commands from `input` until it ends or `quit` is read
///
/// Returns the number of commands that succeeded.
pub fn run_session<R: BufRead, W: Write>(
    runtime: &Runtime,
    library: &Library,
    input: R,
    out: &mut W,
    prompt: bool,
) -> Result<usize> {
    if prompt {
        writeln!(out, "libres shell (type 'help' for commands)")?;
    }

    let mut succeeded = 0;
    let mut lines = input.lines();
    loop {
        if prompt {
            write!(out, "libres> ")?;
            out.flush()?;
        }
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let command = match ShellCommand::from_str(line) {
            Ok(command) => command,
            Err(err) => {
                writeln!(out, "error: {err}")?;
                continue;
            }
        };
        if command == ShellCommand::Quit {
            break;
        }

        tracing::debug!(command = %command, "shell command");
        match execute(runtime, library, command, out) {
            Ok(()) => succeeded += 1,
            Err(Error::Io(err)) => return Err(Error::Io(err)),
            Err(err) => writeln!(out, "error: {err}")?,
        }
    }

    if prompt {
        writeln!(out, "Goodbye!")?;
    }
    Ok(succeeded)
}

fn execute<W: Write>(
    runtime: &Runtime,
    library: &Library,
    command: ShellCommand,
    out: &mut W,
) -> Result<()> {
    match command {
        ShellCommand::AddBook { title, author } => {
            let id = library.add_book(title, author);
            writeln!(out, "Added book ID:{id}")?;
        }
        ShellCommand::RemoveBook(book) => {
            let removed = library.remove_book(book)?;
            writeln!(out, "Removed book ID:{} | {}", removed.id, removed.title)?;
        }
        ShellCommand::AddMember(name) => {
            let id = library.add_member(name);
            writeln!(out, "Added member ID:{id}")?;
        }
        ShellCommand::Borrow { book, member } => {
            let borrowed = library.borrow_book(book, member)?;
            writeln!(out, "Member {member} borrowed book {} | {}", borrowed.id, borrowed.title)?;
        }
        ShellCommand::Return { book, member } => {
            library.return_book(book, member)?;
            writeln!(out, "Member {member} returned book {book}")?;
        }
        ShellCommand::Reserve { book, member } => {
            let reservation = runtime.block_on(library.reserve_book(book, member))?;
            writeln!(
                out,
                "Member {} reserved book {} until {}",
                reservation.member_id,
                reservation.book_id,
                reservation.reserved_until.format("%H:%M:%S%.3f")
            )?;
        }
        ShellCommand::Available => list_books(out, &library.list_available_books())?,
        ShellCommand::Borrowed(member) => {
            library.find_member(member)?;
            list_books(out, &library.list_borrowed_books(member))?;
        }
        ShellCommand::Books => list_books(out, &library.list_books())?,
        ShellCommand::Members => {
            let members = library.list_members();
            if members.is_empty() {
                writeln!(out, "(none)")?;
            }
            for member in members {
                writeln!(
                    out,
                    "ID:{} | Name:{} | Borrowed:{}",
                    member.id,
                    member.name,
                    member.borrowed.len()
                )?;
            }
        }
        ShellCommand::Stats => {
            let stats = library.stats();
            writeln!(
                out,
                "processed:{} granted:{} refused:{} pending-timers:{} expired:{} auto-borrowed:{}",
                stats.center.processed,
                stats.granted,
                stats.refused,
                stats.timers.outstanding,
                stats.timers.expired,
                stats.timers.auto_borrowed
            )?;
        }
        ShellCommand::Help => writeln!(out, "{HELP}")?,
        ShellCommand::Quit => {}
    }
    Ok(())
}

fn list_books<W: Write>(out: &mut W, books: &[crate::model::Book]) -> Result<()> {
    if books.is_empty() {
        writeln!(out, "(none)")?;
    }
    for book in books {
        writeln!(out, "{}", format_book(book))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(script: &str) -> (String, usize) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let mut config = Config::default();
        config.reservations.claim.mode = "never".to_string();
        config.reservations.window = "1h".to_string();
        let library = Library::new(&config).unwrap();
        library.seed(&config.catalog);
        {
            let _enter = runtime.enter();
            library.start().unwrap();
        }

        let mut out = Vec::new();
        let succeeded =
            run_session(&runtime, &library, script.as_bytes(), &mut out, false).unwrap();
        runtime.block_on(library.shutdown());
        (String::from_utf8(out).unwrap(), succeeded)
    }

    #[test]
    fn test_tokenize_handles_quotes() {
        assert_eq!(
            tokenize(r#"add-book "The Rust Book" Klabnik"#).unwrap(),
            vec!["add-book", "The Rust Book", "Klabnik"]
        );
        assert_eq!(tokenize("  books  ").unwrap(), vec!["books"]);
        assert_eq!(tokenize(r#"add-member """#).unwrap(), vec!["add-member", ""]);
        assert!(tokenize(r#"add-member "Dana"#).is_err());
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            ShellCommand::from_str("reserve 1 2").unwrap(),
            ShellCommand::Reserve { book: 1, member: 2 }
        );
        assert_eq!(
            ShellCommand::from_str(r#"add-member "Dana Scully""#).unwrap(),
            ShellCommand::AddMember("Dana Scully".to_string())
        );
        assert_eq!(ShellCommand::from_str("EXIT").unwrap(), ShellCommand::Quit);
        assert!(ShellCommand::from_str("borrow 1").is_err());
        assert!(ShellCommand::from_str("borrow one 2").is_err());
        assert!(ShellCommand::from_str("books 1").is_err());
        assert!(ShellCommand::from_str("dance").is_err());
    }

    #[test]
    fn test_session_reserve_and_contend() {
        let (out, succeeded) = session(
            "reserve 1 1\nreserve 1 2\nborrow 1 3\nborrow 1 1\nborrowed 1\nquit\nbooks\n",
        );
        assert!(out.contains("Member 1 reserved book 1 until"));
        assert!(out.contains("error: Book 1 is already reserved"));
        assert!(out.contains("error: Book 1 is reserved by member 1"));
        assert!(out.contains("Member 1 borrowed book 1 | Concurrency in Go"));
        assert!(out.contains("ID:1 | Title:Concurrency in Go"));
        // nothing after quit runs
        assert_eq!(succeeded, 3);
    }

    #[test]
    fn test_session_errors_do_not_end_it() {
        let (out, succeeded) = session(
            "remove-book 9\nreturn 2 1\nfrobnicate\nadd-book \"Dune\" \"F. Herbert\"\navailable\n",
        );
        assert!(out.contains("error: Book not found: 9"));
        assert!(out.contains("error: Book 2 is not borrowed"));
        assert!(out.contains("error: Invalid argument: unknown command 'frobnicate'"));
        assert!(out.contains("Added book ID:3"));
        assert!(out.contains("ID:3 | Title:Dune | Author:F. Herbert | Status:Available"));
        assert_eq!(succeeded, 2);
    }
}
