//! SQLite storage for analysed test sessions
//!
//! One `test_sessions` row per uploaded report and one `test_values` row per
//! extracted value. Both are append-only and every query is partitioned by
//! the caller-supplied user key.

use std::collections::BTreeMap;
use std::path::Path;
use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result, Row, params};
use serde::{Deserialize, Serialize};

use crate::evaluator::{summarize, Evaluation, StatusCounts};
use crate::ranges::Status;

/// One uploaded report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSession {
    pub id: i64,
    pub user_key: String,
    pub uploaded_at: DateTime<Utc>,
    pub filename: String,
    pub value_count: i64,
    pub normal_count: i64,
    pub abnormal_count: i64,
    pub summary: String,
}

/// One extracted value belonging to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestValue {
    pub id: i64,
    pub session_id: i64,
    pub test_name: String,
    pub value: f64,
    pub unit: String,
    pub status: Status,
}

/// A value together with the upload time of its session
#[derive(Debug, Clone, PartialEq)]
pub struct DatedValue {
    pub uploaded_at: DateTime<Utc>,
    pub value: TestValue,
}

const SESSION_COLUMNS: &str =
    "id, user_key, uploaded_at, filename, value_count, normal_count, abnormal_count, summary";

/// SQLite database for storing sessions
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Create or open a database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Private database that vanishes on drop
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS test_sessions (
                id INTEGER PRIMARY KEY,
                user_key TEXT NOT NULL,
                uploaded_at TEXT NOT NULL,
                filename TEXT NOT NULL,
                value_count INTEGER NOT NULL,
                normal_count INTEGER NOT NULL,
                abnormal_count INTEGER NOT NULL,
                summary TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS test_values (
                id INTEGER PRIMARY KEY,
                session_id INTEGER NOT NULL
                    REFERENCES test_sessions(id) ON DELETE CASCADE,
                test_name TEXT NOT NULL,
                value REAL NOT NULL,
                unit TEXT NOT NULL,
                status TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user
                ON test_sessions(user_key, uploaded_at);

            CREATE INDEX IF NOT EXISTS idx_values_session
                ON test_values(session_id);

            CREATE INDEX IF NOT EXISTS idx_values_test_name
                ON test_values(test_name COLLATE NOCASE);"
        )?;

        Ok(Self { conn })
    }

    /// Persist a session and its values as one unit, stamped now
    pub fn record_session(
        &mut self,
        user_key: &str,
        filename: &str,
        evaluations: &[Evaluation],
    ) -> Result<i64> {
        self.record_session_at(user_key, filename, evaluations, Utc::now())
    }

    /// Persist a session and its values in a single transaction
    pub fn record_session_at(
        &mut self,
        user_key: &str,
        filename: &str,
        evaluations: &[Evaluation],
        uploaded_at: DateTime<Utc>,
    ) -> Result<i64> {
        let counts = StatusCounts::from_evaluations(evaluations);
        let summary = summarize(evaluations);

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO test_sessions
                (user_key, uploaded_at, filename, value_count, normal_count, abnormal_count, summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user_key,
                format_timestamp(&uploaded_at),
                filename,
                evaluations.len() as i64,
                counts.normal as i64,
                counts.abnormal() as i64,
                summary,
            ],
        )?;
        let session_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO test_values (session_id, test_name, value, unit, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            )?;
            for evaluation in evaluations {
                stmt.execute(params![
                    session_id,
                    evaluation.test_name,
                    evaluation.value,
                    evaluation.unit,
                    evaluation.status.as_str(),
                ])?;
            }
        }

        tx.commit()?;
        info!("Stored {} test results for user {} (session {})", evaluations.len(), user_key, session_id);
        Ok(session_id)
    }

    /// Sessions for a user, most recent first
    pub fn get_history(&self, user_key: &str, limit: usize) -> Result<Vec<TestSession>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM test_sessions
             WHERE user_key = ?1
             ORDER BY uploaded_at DESC, id DESC
             LIMIT ?2"
        ))?;

        let sessions = stmt.query_map(
            params![user_key, limit as i64],
            |row| Self::row_to_session(row),
        )?.collect::<Result<Vec<_>>>()?;

        Ok(sessions)
    }

    /// A single session, scoped to its owner
    pub fn get_session(&self, user_key: &str, session_id: i64) -> Result<Option<TestSession>> {
        self.conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM test_sessions WHERE user_key = ?1 AND id = ?2"),
            params![user_key, session_id],
            |row| Self::row_to_session(row),
        ).optional()
    }

    /// Values of one session keyed by test name
    pub fn get_values(&self, session_id: i64) -> Result<BTreeMap<String, TestValue>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, test_name, value, unit, status
             FROM test_values
             WHERE session_id = ?1
             ORDER BY id"
        )?;

        let mut values = BTreeMap::new();
        for value in stmt.query_map([session_id], |row| Self::row_to_value(row, 0))? {
            let value = value?;
            values.entry(value.test_name.clone()).or_insert(value);
        }
        Ok(values)
    }

    /// Every value of one test for a user, oldest first.
    /// Test names compare case-insensitively.
    pub fn value_series(
        &self,
        user_key: &str,
        test_name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<DatedValue>> {
        let since = since.map(|t| format_timestamp(&t)).unwrap_or_default();
        let mut stmt = self.conn.prepare(
            "SELECT s.uploaded_at, v.id, v.session_id, v.test_name, v.value, v.unit, v.status
             FROM test_values v
             JOIN test_sessions s ON s.id = v.session_id
             WHERE s.user_key = ?1
               AND v.test_name = ?2 COLLATE NOCASE
               AND s.uploaded_at >= ?3
             ORDER BY s.uploaded_at ASC, s.id ASC, v.id ASC"
        )?;

        let series = stmt.query_map(params![user_key, test_name, since], |row| {
            Ok(DatedValue {
                uploaded_at: parse_timestamp(row, 0)?,
                value: Self::row_to_value(row, 1)?,
            })
        })?.collect::<Result<Vec<_>>>()?;

        Ok(series)
    }

    /// Number of sessions stored for a user
    pub fn session_count(&self, user_key: &str) -> Result<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM test_sessions WHERE user_key = ?1",
            [user_key],
            |row| row.get(0),
        )
    }

    /// Number of values stored for a user across all sessions
    pub fn value_count(&self, user_key: &str) -> Result<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM test_values v
             JOIN test_sessions s ON s.id = v.session_id
             WHERE s.user_key = ?1",
            [user_key],
            |row| row.get(0),
        )
    }

    /// Distinct test names recorded for a user, ignoring case
    pub fn distinct_tests(&self, user_key: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT MIN(v.test_name) FROM test_values v
             JOIN test_sessions s ON s.id = v.session_id
             WHERE s.user_key = ?1
             GROUP BY lower(v.test_name)
             ORDER BY lower(v.test_name)"
        )?;

        let names = stmt.query_map([user_key], |row| row.get(0))?
            .collect::<Result<Vec<String>>>()?;

        Ok(names)
    }

    /// Upload times of the first and latest session
    pub fn first_and_latest(&self, user_key: &str) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let bounds: (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(uploaded_at), MAX(uploaded_at) FROM test_sessions WHERE user_key = ?1",
            [user_key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        match bounds {
            (Some(first), Some(latest)) => Ok(Some((
                timestamp_from_str(&first, 0)?,
                timestamp_from_str(&latest, 1)?,
            ))),
            _ => Ok(None),
        }
    }

    fn row_to_session(row: &Row) -> Result<TestSession> {
        Ok(TestSession {
            id: row.get(0)?,
            user_key: row.get(1)?,
            uploaded_at: parse_timestamp(row, 2)?,
            filename: row.get(3)?,
            value_count: row.get(4)?,
            normal_count: row.get(5)?,
            abnormal_count: row.get(6)?,
            summary: row.get(7)?,
        })
    }

    /// Read a value whose columns start at `offset`
    fn row_to_value(row: &Row, offset: usize) -> Result<TestValue> {
        let status: String = row.get(offset + 5)?;
        Ok(TestValue {
            id: row.get(offset)?,
            session_id: row.get(offset + 1)?,
            test_name: row.get(offset + 2)?,
            value: row.get(offset + 3)?,
            unit: row.get(offset + 4)?,
            status: status.parse().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(offset + 5, Type::Text, Box::new(e))
            })?,
        })
    }
}

/// Fixed-width UTC timestamps so text order matches time order
fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row, idx: usize) -> Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    timestamp_from_str(&text, idx)
}

fn timestamp_from_str(text: &str, idx: usize) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use crate::extractor::ExtractedValue;
    use crate::evaluator::evaluate;
    use crate::ranges::ReferenceTable;

    fn evaluations(values: &[(&str, f64)]) -> Vec<Evaluation> {
        let table = ReferenceTable::builtin().unwrap();
        values
            .iter()
            .map(|(name, value)| {
                let range = table.get(name);
                let unit = range.map(|r| r.unit.clone()).unwrap_or_default();
                evaluate(name, &ExtractedValue { value: *value, unit }, range)
            })
            .collect()
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_record_then_history() {
        let mut storage = Storage::open_in_memory().unwrap();
        let values = evaluations(&[("Glucose", 104.0), ("HDL", 55.0), ("LDL", 90.0)]);

        let id = storage.record_session("user_a", "march.pdf", &values).unwrap();
        let history = storage.get_history("user_a", 10).unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].filename, "march.pdf");
        assert_eq!(history[0].value_count, values.len() as i64);
        assert_eq!(history[0].normal_count, 2);
        assert_eq!(history[0].abnormal_count, 1);
    }

    #[test]
    fn test_history_is_most_recent_first_and_limited() {
        let mut storage = Storage::open_in_memory().unwrap();
        for day in [1, 3, 2] {
            let name = format!("day{}.pdf", day);
            storage.record_session_at("u", &name, &evaluations(&[("Glucose", 90.0)]), at(day)).unwrap();
        }

        let history = storage.get_history("u", 10).unwrap();
        let names: Vec<_> = history.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names, ["day3.pdf", "day2.pdf", "day1.pdf"]);

        assert_eq!(storage.get_history("u", 2).unwrap().len(), 2);
    }

    #[test]
    fn test_users_are_partitioned() {
        let mut storage = Storage::open_in_memory().unwrap();
        let id = storage.record_session("alice", "a.pdf", &evaluations(&[("Glucose", 90.0)])).unwrap();
        storage.record_session("bob", "b.pdf", &evaluations(&[("Glucose", 120.0)])).unwrap();

        assert_eq!(storage.get_history("alice", 10).unwrap().len(), 1);
        assert_eq!(storage.session_count("bob").unwrap(), 1);
        assert!(storage.get_session("bob", id).unwrap().is_none());
        assert!(storage.get_session("alice", id).unwrap().is_some());
        assert!(storage.get_history("carol", 10).unwrap().is_empty());
    }

    #[test]
    fn test_get_values_by_session() {
        let mut storage = Storage::open_in_memory().unwrap();
        let id = storage.record_session("u", "r.pdf", &evaluations(&[("Glucose", 130.0), ("Zinc", 80.0)])).unwrap();

        let values = storage.get_values(id).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["Glucose"].value, 130.0);
        assert_eq!(values["Glucose"].status, Status::High);
        assert_eq!(values["Glucose"].session_id, id);
        assert_eq!(values["Zinc"].status, Status::Unclassified);
        assert!(storage.get_values(id + 100).unwrap().is_empty());
    }

    #[test]
    fn test_empty_session_is_persisted() {
        let mut storage = Storage::open_in_memory().unwrap();
        let id = storage.record_session("u", "blank.pdf", &[]).unwrap();

        let history = storage.get_history("u", 10).unwrap();
        assert_eq!(history[0].value_count, 0);
        assert!(storage.get_values(id).unwrap().is_empty());
        assert_eq!(storage.value_count("u").unwrap(), 0);
    }

    #[test]
    fn test_value_series_is_chronological_and_case_insensitive() {
        let mut storage = Storage::open_in_memory().unwrap();
        storage.record_session_at("u", "b.pdf", &evaluations(&[("Total Cholesterol", 190.0)]), at(2)).unwrap();
        storage.record_session_at("u", "a.pdf", &evaluations(&[("Total Cholesterol", 200.0)]), at(1)).unwrap();
        storage.record_session_at("u", "c.pdf", &evaluations(&[("Glucose", 88.0)]), at(3)).unwrap();

        let series = storage.value_series("u", "total cholesterol", None).unwrap();
        let values: Vec<f64> = series.iter().map(|p| p.value.value).collect();
        assert_eq!(values, [200.0, 190.0]);
        assert_eq!(series[0].uploaded_at, at(1));

        let recent = storage.value_series("u", "Total Cholesterol", Some(at(2) - Duration::hours(1))).unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_aggregates() {
        let mut storage = Storage::open_in_memory().unwrap();
        assert!(storage.first_and_latest("u").unwrap().is_none());

        storage.record_session_at("u", "a.pdf", &evaluations(&[("Glucose", 90.0), ("HDL", 50.0)]), at(1)).unwrap();
        storage.record_session_at("u", "b.pdf", &evaluations(&[("glucose", 95.0)]), at(11)).unwrap();

        assert_eq!(storage.session_count("u").unwrap(), 2);
        assert_eq!(storage.value_count("u").unwrap(), 3);
        assert_eq!(storage.distinct_tests("u").unwrap(), ["Glucose", "HDL"]);
        assert_eq!(storage.first_and_latest("u").unwrap(), Some((at(1), at(11))));
    }

    #[test]
    fn test_reopen_keeps_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");

        {
            let mut storage = Storage::new(&path).unwrap();
            storage.record_session("u", "r.pdf", &evaluations(&[("TSH", 2.1)])).unwrap();
        }

        let storage = Storage::new(&path).unwrap();
        assert_eq!(storage.session_count("u").unwrap(), 1);
        assert_eq!(storage.distinct_tests("u").unwrap(), ["TSH"]);
    }
}
