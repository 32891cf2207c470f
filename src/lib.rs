//! libres - in-memory library catalog with concurrent reservations
//!
//! Books and members live in a single [`store::Store`]. Reservations are
//! handed to a fixed pool of workers through a bounded queue; each granted
//! reservation starts a timer that later cancels it, or turns it into a
//! borrow if the holder claimed the book in time.
//!
//! # Module Organization
//!
//! - `model`: books, members, reservations
//! - `store`: the locked catalog and every state transition
//! - `reservation`: request protocol and worker pool
//! - `expiry`: per-reservation timers and the claim policy
//! - `clock`: injectable time sources and duration parsing
//! - `library`: facade tying the pieces together
//! - `config`: configuration loading from `libres.toml`
//! - `error`: error types and result aliases
//! - `output`: human and JSON output for the CLI
//! - `cli`: command-line interface using clap
//!
//! ```no_run
//! # async fn demo() -> libres::Result<()> {
//! use libres::{config::Config, Library};
//!
//! let config = Config::default();
//! let library = Library::new(&config)?;
//! library.seed(&config.catalog);
//! library.start()?;
//!
//! let reservation = library.reserve_book(1, 1).await?;
//! println!("held until {}", reservation.reserved_until);
//!
//! library.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod expiry;
pub mod library;
pub mod model;
pub mod output;
pub mod reservation;
pub mod store;

pub use error::{Error, Result};
pub use library::Library;
