//! Turning a finalized session into attendance records.
//!
//! Every roster member gets exactly one record, whether or not they made it
//! into the gallery. Records go to the attendance store one at a time in
//! roster order, then to the report export as one batch. The two hand-offs
//! are independent: a failure in one is reported but never undoes the other.

use crate::roster::RosterMember;
use crate::session::FinalizedSession;
use crate::types::{AttendanceRecord, AttendanceStatus};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("attendance store: {0}")]
pub struct StoreError(pub String);

#[derive(Debug, Error)]
#[error("report export: {0}")]
pub struct ExportError(pub String);

/// Append-style persistent store for attendance records.
pub trait AttendanceStore {
    fn append(&mut self, record: &AttendanceRecord) -> Result<(), StoreError>;
}

/// A record plus the roster details the tabular report shows.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub record: AttendanceRecord,
    pub full_name: String,
    pub contact: String,
}

/// Tabular report sink, handed all rows at once.
pub trait ReportExport {
    fn export(&mut self, rows: &[ReportRow]) -> Result<(), ExportError>;
}

/// A store append that failed for one member.
#[derive(Debug)]
pub struct RecordFailure {
    pub code: String,
    pub error: StoreError,
}

/// What happened during emission.
#[derive(Debug)]
pub struct EmitOutcome {
    pub records: Vec<AttendanceRecord>,
    pub store_failures: Vec<RecordFailure>,
    pub export_error: Option<ExportError>,
}

impl EmitOutcome {
    pub fn is_complete(&self) -> bool {
        self.store_failures.is_empty() && self.export_error.is_none()
    }

    pub fn present_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == AttendanceStatus::Present)
            .count()
    }
}

pub struct ReportEmitter {
    course: String,
}

impl ReportEmitter {
    pub fn new(course: impl Into<String>) -> Self {
        Self {
            course: course.into(),
        }
    }

    /// One record per roster member, in roster order, stamped with the
    /// session's start date and time.
    pub fn records(&self, session: &FinalizedSession, roster: &[RosterMember]) -> Vec<AttendanceRecord> {
        let date = session.started_at.date();
        let time = session.started_at.time();
        roster
            .iter()
            .map(|member| AttendanceRecord {
                code: member.code.clone(),
                course: self.course.clone(),
                date,
                time,
                status: if session.present.contains(&member.code) {
                    AttendanceStatus::Present
                } else {
                    AttendanceStatus::Absent
                },
            })
            .collect()
    }

    /// Hand the records to both collaborators. Nothing is retried.
    pub fn emit(
        &self,
        session: &FinalizedSession,
        roster: &[RosterMember],
        store: &mut dyn AttendanceStore,
        export: &mut dyn ReportExport,
    ) -> EmitOutcome {
        let records = self.records(session, roster);

        let mut store_failures = Vec::new();
        for record in &records {
            if let Err(error) = store.append(record) {
                tracing::warn!(code = %record.code, error = %error, "attendance record not stored");
                store_failures.push(RecordFailure {
                    code: record.code.clone(),
                    error,
                });
            }
        }

        let rows: Vec<ReportRow> = records
            .iter()
            .zip(roster)
            .map(|(record, member)| ReportRow {
                record: record.clone(),
                full_name: member.name.clone(),
                contact: member.contact.clone(),
            })
            .collect();
        let export_error = export.export(&rows).err();
        if let Some(e) = &export_error {
            tracing::warn!(error = %e, "attendance report not exported");
        }

        let outcome = EmitOutcome {
            records,
            store_failures,
            export_error,
        };
        tracing::info!(
            course = %self.course,
            records = outcome.records.len(),
            present = outcome.present_count(),
            store_failures = outcome.store_failures.len(),
            exported = outcome.export_error.is_none(),
            "attendance emitted"
        );
        outcome
    }
}
