//! SQLite persistence for employees, reference descriptors and attendance.
//!
//! Each employee owns at most one current descriptor (`UNIQUE(employee_id)`).
//! Re-enrollment deletes the old row and inserts a new one. Deleting an
//! employee cascades to descriptors and attendance.

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, TimeDelta, Utc};
use facegate_core::{Acceptance, AttendanceKind, Descriptor, EmployeeId, ReferenceDescriptor};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS employees (
    id          TEXT PRIMARY KEY,
    email       TEXT NOT NULL UNIQUE,
    full_name   TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS face_descriptors (
    id          TEXT PRIMARY KEY,
    employee_id TEXT NOT NULL UNIQUE REFERENCES employees(id) ON DELETE CASCADE,
    descriptor  TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id             TEXT PRIMARY KEY,
    employee_id    TEXT NOT NULL REFERENCES employees(id) ON DELETE CASCADE,
    kind           TEXT NOT NULL,
    confidence     REAL NOT NULL,
    liveness_score REAL NOT NULL,
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS attendance_employee_created
    ON attendance(employee_id, created_at);
";

/// Days covered by the stats chart and the month counter.
const STATS_WINDOW_DAYS: i64 = 30;
const WEEK_DAYS: i64 = 7;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode descriptor: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to create data directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub email: String,
    pub full_name: String,
    pub descriptor_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Outcome of storing a reference descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct DescriptorWrite {
    pub descriptor_id: String,
    /// True when a previous descriptor for the same employee was dropped.
    pub replaced: bool,
}

/// One accepted check-in or check-out. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEvent {
    pub id: String,
    pub employee_id: EmployeeId,
    pub kind: AttendanceKind,
    pub confidence: f32,
    pub liveness_score: f32,
    pub created_at: DateTime<Utc>,
}

/// Attendance event joined with the employee it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceLogEntry {
    #[serde(flatten)]
    pub event: AttendanceEvent,
    pub employee_name: String,
    pub employee_email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStat {
    /// UTC calendar day, `YYYY-MM-DD`.
    pub date: String,
    pub count: u32,
    pub avg_liveness: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceStats {
    pub today_count: u32,
    pub week_count: u32,
    pub month_count: u32,
    /// Mean liveness over all of the employee's events; 0 when there are none.
    pub avg_liveness: f32,
    pub chart: Vec<DailyStat>,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::init(Connection::open(path)?)?;
        tracing::info!(path = %path.display(), "attendance store opened");
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn employee(&self, id: &EmployeeId) -> Result<Option<Employee>, StoreError> {
        let employee = self
            .conn
            .query_row(
                "SELECT e.id, e.email, e.full_name, e.created_at,
                        (SELECT COUNT(*) FROM face_descriptors d WHERE d.employee_id = e.id)
                 FROM employees e WHERE e.id = ?1",
                [id.as_str()],
                employee_from_row,
            )
            .optional()?;
        Ok(employee)
    }

    pub fn email_taken(&self, email: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM employees WHERE email = ?1",
            [email],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Create an employee and their first reference descriptor atomically.
    pub fn create_employee(
        &mut self,
        email: &str,
        full_name: &str,
        descriptor: &Descriptor,
    ) -> Result<Employee, StoreError> {
        let id = EmployeeId(uuid::Uuid::new_v4().to_string());
        let now = Utc::now();
        let encoded = serde_json::to_string(descriptor)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO employees (id, email, full_name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id.as_str(), email, full_name, timestamp(now)],
        )?;
        tx.execute(
            "INSERT INTO face_descriptors (id, employee_id, descriptor, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![uuid::Uuid::new_v4().to_string(), id.as_str(), encoded, timestamp(now)],
        )?;
        tx.commit()?;

        tracing::info!(employee = %id, email, "employee enrolled");

        Ok(Employee {
            id,
            email: email.to_string(),
            full_name: full_name.to_string(),
            descriptor_count: 1,
            created_at: now,
        })
    }

    /// Replace the employee's reference descriptor, or store the first one.
    pub fn upsert_descriptor(
        &mut self,
        id: &EmployeeId,
        descriptor: &Descriptor,
    ) -> Result<DescriptorWrite, StoreError> {
        let descriptor_id = uuid::Uuid::new_v4().to_string();
        let encoded = serde_json::to_string(descriptor)?;

        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM face_descriptors WHERE employee_id = ?1",
            [id.as_str()],
        )?;
        tx.execute(
            "INSERT INTO face_descriptors (id, employee_id, descriptor, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![descriptor_id, id.as_str(), encoded, timestamp(Utc::now())],
        )?;
        tx.commit()?;

        tracing::info!(employee = %id, replaced = removed > 0, "reference descriptor stored");

        Ok(DescriptorWrite {
            descriptor_id,
            replaced: removed > 0,
        })
    }

    /// Reference descriptors of one employee, newest first.
    pub fn references_for(&self, id: &EmployeeId) -> Result<Vec<Descriptor>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT descriptor FROM face_descriptors
             WHERE employee_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([id.as_str()], |row| descriptor_column(row, 0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every stored descriptor, optionally excluding one employee's.
    pub fn references_excluding(
        &self,
        exclude: Option<&EmployeeId>,
    ) -> Result<Vec<ReferenceDescriptor>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT employee_id, descriptor FROM face_descriptors
             WHERE ?1 IS NULL OR employee_id <> ?1",
        )?;
        let rows = stmt.query_map([exclude.map(EmployeeId::as_str)], |row| {
            Ok(ReferenceDescriptor {
                owner: EmployeeId(row.get(0)?),
                descriptor: descriptor_column(row, 1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn record_attendance(
        &self,
        id: &EmployeeId,
        kind: AttendanceKind,
        acceptance: &Acceptance,
        at: DateTime<Utc>,
    ) -> Result<AttendanceEvent, StoreError> {
        let event = AttendanceEvent {
            id: uuid::Uuid::new_v4().to_string(),
            employee_id: id.clone(),
            kind,
            confidence: acceptance.confidence,
            liveness_score: acceptance.liveness.value(),
            created_at: at,
        };

        self.conn.execute(
            "INSERT INTO attendance (id, employee_id, kind, confidence, liveness_score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id,
                id.as_str(),
                kind.as_str(),
                event.confidence as f64,
                event.liveness_score as f64,
                timestamp(at),
            ],
        )?;

        Ok(event)
    }

    /// Most recent events of one employee, newest first.
    pub fn history(&self, id: &EmployeeId, limit: usize) -> Result<Vec<AttendanceEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, employee_id, kind, confidence, liveness_score, created_at
             FROM attendance WHERE employee_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![id.as_str(), limit as i64], event_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Organisation-wide log, newest first, optionally limited to one UTC day.
    pub fn attendance_log(
        &self,
        date: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<AttendanceLogEntry>, StoreError> {
        let (from, until) = match date {
            Some(day) => {
                let start = day.and_time(NaiveTime::MIN).and_utc();
                (Some(timestamp(start)), Some(timestamp(start + TimeDelta::days(1))))
            }
            None => (None, None),
        };

        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.employee_id, a.kind, a.confidence, a.liveness_score, a.created_at,
                    e.full_name, e.email
             FROM attendance a JOIN employees e ON e.id = a.employee_id
             WHERE (?1 IS NULL OR a.created_at >= ?1) AND (?2 IS NULL OR a.created_at < ?2)
             ORDER BY a.created_at DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![from, until, limit as i64], |row| {
            Ok(AttendanceLogEntry {
                event: event_from_row(row)?,
                employee_name: row.get(6)?,
                employee_email: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn stats(&self, id: &EmployeeId, now: DateTime<Utc>) -> Result<AttendanceStats, StoreError> {
        let today = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let week = now - TimeDelta::days(WEEK_DAYS);
        let month = now - TimeDelta::days(STATS_WINDOW_DAYS);

        let count_since = |since: DateTime<Utc>| -> Result<u32, StoreError> {
            let count: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM attendance WHERE employee_id = ?1 AND created_at >= ?2",
                params![id.as_str(), timestamp(since)],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        };

        let avg_liveness: Option<f64> = self.conn.query_row(
            "SELECT AVG(liveness_score) FROM attendance WHERE employee_id = ?1",
            [id.as_str()],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT substr(created_at, 1, 10) AS day, COUNT(*), AVG(liveness_score)
             FROM attendance WHERE employee_id = ?1 AND created_at >= ?2
             GROUP BY day ORDER BY day",
        )?;
        let chart = stmt
            .query_map(params![id.as_str(), timestamp(month)], |row| {
                Ok(DailyStat {
                    date: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u32,
                    avg_liveness: row.get::<_, f64>(2)? as f32,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AttendanceStats {
            today_count: count_since(today)?,
            week_count: count_since(week)?,
            month_count: count_since(month)?,
            avg_liveness: avg_liveness.unwrap_or(0.0) as f32,
            chart,
        })
    }

    /// All employees, newest first, with their descriptor counts.
    pub fn list_employees(&self) -> Result<Vec<Employee>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.email, e.full_name, e.created_at,
                    (SELECT COUNT(*) FROM face_descriptors d WHERE d.employee_id = e.id)
             FROM employees e ORDER BY e.created_at DESC",
        )?;
        let rows = stmt.query_map([], employee_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete an employee with their descriptors and attendance.
    /// Returns false if no such employee exists.
    pub fn remove_employee(&mut self, id: &EmployeeId) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM employees WHERE id = ?1", [id.as_str()])?;
        if removed > 0 {
            tracing::info!(employee = %id, "employee removed");
        }
        Ok(removed > 0)
    }
}

/// Fixed-width UTC timestamp so lexical order matches chronological order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn descriptor_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Descriptor> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn employee_from_row(row: &Row<'_>) -> rusqlite::Result<Employee> {
    Ok(Employee {
        id: EmployeeId(row.get(0)?),
        email: row.get(1)?,
        full_name: row.get(2)?,
        created_at: timestamp_column(row, 3)?,
        descriptor_count: row.get::<_, i64>(4)? as u32,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceEvent> {
    let kind: String = row.get(2)?;
    let kind = AttendanceKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown attendance kind {kind:?}").into(),
        )
    })?;

    Ok(AttendanceEvent {
        id: row.get(0)?,
        employee_id: EmployeeId(row.get(1)?),
        kind,
        confidence: row.get::<_, f64>(3)? as f32,
        liveness_score: row.get::<_, f64>(4)? as f32,
        created_at: timestamp_column(row, 5)?,
    })
}
