//! rollcall-store: Persistence for rosters and attendance.
//!
//! SQLite backs both the roster source and the attendance store; the tabular
//! report is a CSV file.

pub mod csv_report;
pub mod sqlite;

pub use csv_report::{default_report_name, CsvFileReport, CsvReport};
pub use sqlite::{DbError, NewStudent, SqliteStore};
