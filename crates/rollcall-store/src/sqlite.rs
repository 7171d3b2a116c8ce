//! SQLite roster source and attendance store.
//!
//! Schema: `classes(name, year)`, `students(...)` joined on the class name,
//! and an append-only `absences` table that receives one row per member per
//! session.

use chrono::{NaiveDate, NaiveTime};
use rollcall_core::report::{AttendanceStore, StoreError};
use rollcall_core::roster::{RosterError, RosterMember, RosterSelector, RosterSource};
use rollcall_core::types::{AttendanceRecord, AttendanceStatus};
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS classes (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  TEXT NOT NULL,
    year  TEXT NOT NULL,
    UNIQUE (name, year)
);

CREATE TABLE IF NOT EXISTS students (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id   TEXT NOT NULL UNIQUE,
    first_name   TEXT NOT NULL,
    last_name    TEXT NOT NULL,
    email        TEXT NOT NULL DEFAULT '',
    class        TEXT NOT NULL,
    image_recog  TEXT
);

CREATE TABLE IF NOT EXISTS absences (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id  TEXT NOT NULL,
    subject     TEXT NOT NULL,
    date        TEXT NOT NULL,
    time        TEXT NOT NULL,
    status      TEXT NOT NULL CHECK (status IN ('present', 'absent'))
);

CREATE INDEX IF NOT EXISTS idx_students_class ON students(class);
CREATE INDEX IF NOT EXISTS idx_absences_subject ON absences(subject, date);
";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid {column} value {value:?}")]
    InvalidColumn { column: &'static str, value: String },
}

/// A student row to enroll.
#[derive(Debug, Clone)]
pub struct NewStudent<'a> {
    pub student_id: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub class: &'a str,
    pub image_recog: Option<&'a Path>,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| DbError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened attendance database");
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self, DbError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Create the tables if they do not exist yet.
    pub fn init_schema(&self) -> Result<(), DbError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn add_class(&self, name: &str, year: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO classes (name, year) VALUES (?1, ?2)",
            params![name, year],
        )?;
        Ok(())
    }

    pub fn add_student(&self, student: &NewStudent<'_>) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO students (student_id, first_name, last_name, email, class, image_recog)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                student.student_id,
                student.first_name,
                student.last_name,
                student.email,
                student.class,
                student.image_recog.map(|p| p.to_string_lossy().into_owned()),
            ],
        )?;
        Ok(())
    }

    /// Attendance rows recorded for `course`, oldest first.
    pub fn attendance(&self, course: &str) -> Result<Vec<AttendanceRecord>, DbError> {
        self.query_records(
            "SELECT student_id, subject, date, time, status
             FROM absences
             WHERE subject = ?1
             ORDER BY id",
            course,
        )
    }

    /// Every attendance row for one student across courses, newest first.
    pub fn student_history(&self, code: &str) -> Result<Vec<AttendanceRecord>, DbError> {
        self.query_records(
            "SELECT student_id, subject, date, time, status
             FROM absences
             WHERE student_id = ?1
             ORDER BY date DESC, time DESC, id DESC",
            code,
        )
    }

    fn query_records(&self, sql: &str, key: &str) -> Result<Vec<AttendanceRecord>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (code, course, date, time, status) = row?;
            records.push(AttendanceRecord {
                code,
                course,
                date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
                    .map_err(|_| DbError::InvalidColumn { column: "date", value: date.clone() })?,
                time: NaiveTime::parse_from_str(&time, TIME_FORMAT)
                    .map_err(|_| DbError::InvalidColumn { column: "time", value: time.clone() })?,
                status: parse_status(&status)?,
            });
        }
        Ok(records)
    }

    fn class_exists(&self, selector: &RosterSelector) -> Result<bool, rusqlite::Error> {
        self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM classes WHERE name = ?1 AND year = ?2)",
            params![selector.class_name, selector.year],
            |row| row.get(0),
        )
    }

    fn roster_rows(&self, selector: &RosterSelector) -> Result<Vec<RosterMember>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT s.student_id, s.first_name, s.last_name, s.email, s.image_recog
             FROM students s
             JOIN classes c ON s.class = c.name
             WHERE c.name = ?1 AND c.year = ?2
             ORDER BY s.id",
        )?;
        let rows = stmt.query_map(params![selector.class_name, selector.year], row_to_member)?;
        rows.collect()
    }
}

fn row_to_member(row: &Row<'_>) -> rusqlite::Result<RosterMember> {
    let first: String = row.get(1)?;
    let last: String = row.get(2)?;
    let image: Option<String> = row.get(4)?;
    Ok(RosterMember {
        code: row.get(0)?,
        name: format!("{first} {last}"),
        contact: row.get(3)?,
        reference_image: image.filter(|p| !p.is_empty()).map(PathBuf::from),
    })
}

fn parse_status(value: &str) -> Result<AttendanceStatus, DbError> {
    match value {
        "present" => Ok(AttendanceStatus::Present),
        "absent" => Ok(AttendanceStatus::Absent),
        _ => Err(DbError::InvalidColumn {
            column: "status",
            value: value.to_string(),
        }),
    }
}

impl RosterSource for SqliteStore {
    fn members(&self, selector: &RosterSelector) -> Result<Vec<RosterMember>, RosterError> {
        let known = self
            .class_exists(selector)
            .map_err(|e| RosterError::Query(e.to_string()))?;
        if !known {
            return Err(RosterError::UnknownSelector {
                class_name: selector.class_name.clone(),
                year: selector.year.clone(),
            });
        }

        let members = self
            .roster_rows(selector)
            .map_err(|e| RosterError::Query(e.to_string()))?;
        tracing::info!(
            class = %selector.class_name,
            year = %selector.year,
            members = members.len(),
            "roster loaded"
        );
        Ok(members)
    }
}

impl AttendanceStore for SqliteStore {
    fn append(&mut self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO absences (student_id, subject, date, time, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.code,
                    record.course,
                    record.date.format(DATE_FORMAT).to_string(),
                    record.time.format(TIME_FORMAT).to_string(),
                    record.status.as_str(),
                ],
            )
            .map_err(|e| StoreError(e.to_string()))?;
        Ok(())
    }
}
