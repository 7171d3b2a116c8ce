//! CSV attendance report.

use rollcall_core::report::{ExportError, ReportExport, ReportRow};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const HEADER: [&str; 5] = ["Student ID", "Full Name", "Status", "Date", "Email"];

/// `<course with spaces replaced by underscores>_Attendance.csv`
pub fn default_report_name(course: &str) -> String {
    format!("{}_Attendance.csv", course.replace(' ', "_"))
}

/// Writes one header row and one row per member to any writer.
pub struct CsvReport<W: Write> {
    writer: Option<W>,
}

impl<W: Write> CsvReport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
        }
    }
}

/// CSV report written to a file created at export time, truncating any
/// earlier report of the same name.
#[derive(Debug, Clone)]
pub struct CsvFileReport {
    path: PathBuf,
}

impl CsvFileReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/<default name for course>`.
    pub fn in_dir(dir: &Path, course: &str) -> Self {
        Self::new(dir.join(default_report_name(course)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportExport for CsvFileReport {
    fn export(&mut self, rows: &[ReportRow]) -> Result<(), ExportError> {
        let file = File::create(&self.path)
            .map_err(|e| ExportError(format!("{}: {e}", self.path.display())))?;
        CsvReport::new(file).export(rows)?;
        tracing::info!(path = %self.path.display(), rows = rows.len(), "attendance report written");
        Ok(())
    }
}

impl<W: Write> ReportExport for CsvReport<W> {
    fn export(&mut self, rows: &[ReportRow]) -> Result<(), ExportError> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| ExportError("report already written".into()))?;
        let mut out = csv::Writer::from_writer(writer);

        out.write_record(HEADER).map_err(csv_error)?;
        for row in rows {
            let date = row.record.date.to_string();
            out.write_record([
                row.record.code.as_str(),
                row.full_name.as_str(),
                row.record.status.as_str(),
                date.as_str(),
                row.contact.as_str(),
            ])
            .map_err(csv_error)?;
        }
        out.flush().map_err(|e| ExportError(e.to_string()))?;

        tracing::debug!(rows = rows.len(), "csv report written");
        Ok(())
    }
}

fn csv_error(e: csv::Error) -> ExportError {
    ExportError(e.to_string())
}
