//! SQLite-backed entity store.
//!
//! One [`Store`] owns one connection. Components borrow it for the length of a
//! request; nothing is cached between requests, so any number of processes may
//! open the same database file and coordinate through SQLite locking alone.

pub mod attendance;
pub mod classes;
pub mod sessions;
pub mod students;

use crate::error::CoreResult;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DB_FILE_NAME: &str = "attendance.sqlite3";

pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (creating if needed) `attendance.sqlite3` inside a workspace folder.
    pub fn open_workspace(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Store> {
        std::fs::create_dir_all(workspace)?;
        Store::open(&workspace.join(DB_FILE_NAME), busy_timeout)
    }

    pub fn open(db_path: &Path, busy_timeout: Duration) -> anyhow::Result<Store> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
        debug!(path = %db_path.display(), journal_mode = %mode, "opened attendance store");
        init_schema(&conn)?;
        Ok(Store {
            conn,
            path: Some(db_path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Store> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Store { conn, path: None })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `BEGIN IMMEDIATE`: takes the write lock up front so a check followed by a
    /// write cannot interleave with another writer.
    pub fn write_tx(&self) -> CoreResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    /// Deferred transaction used for multi-query reads; all reads inside observe
    /// the same snapshot.
    pub fn read_tx(&self) -> CoreResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Deferred,
        )?)
    }
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            grade_level TEXT NOT NULL,
            capacity INTEGER NOT NULL DEFAULT 30,
            teacher_name TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            barcode TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            class_id TEXT,
            parent_phone_enc TEXT,
            emergency_phone_enc TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    // Workspaces created before parent_email existed get the column added here.
    ensure_students_parent_email(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            description TEXT,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT,
            status TEXT NOT NULL
                CHECK(status IN ('scheduled', 'active', 'completed', 'cancelled')),
            quiz_total_score INTEGER NOT NULL DEFAULT 10,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_class_date ON sessions(class_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            attendance_time TEXT NOT NULL,
            teacher_rating TEXT,
            quiz_score INTEGER CHECK(quiz_score IS NULL OR quiz_score BETWEEN 0 AND 100),
            participation_rating TEXT,
            behavior_rating TEXT,
            homework_status TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            UNIQUE(student_id, session_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_session ON attendance(session_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;

    Ok(())
}

fn ensure_students_parent_email(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "parent_email")? {
        conn.execute("ALTER TABLE students ADD COLUMN parent_email TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let cols = stmt
        .query_map([], |r| r.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cols.iter().any(|c| c == column))
}

/// Fresh text id for a new row.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        init_schema(store.conn()).unwrap();
        assert!(table_has_column(store.conn(), "students", "parent_email").unwrap());
    }

    #[test]
    fn legacy_students_table_gains_parent_email() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE classes(id TEXT PRIMARY KEY, name TEXT NOT NULL UNIQUE,
                description TEXT, grade_level TEXT NOT NULL, capacity INTEGER NOT NULL DEFAULT 30,
                teacher_name TEXT, created_at TEXT NOT NULL, updated_at TEXT NOT NULL);
             CREATE TABLE students(id TEXT PRIMARY KEY, barcode TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL, class_id TEXT, parent_phone_enc TEXT, emergency_phone_enc TEXT,
                active INTEGER NOT NULL DEFAULT 1, created_at TEXT NOT NULL, updated_at TEXT NOT NULL);",
        )
        .unwrap();
        assert!(!table_has_column(&conn, "students", "parent_email").unwrap());
        init_schema(&conn).unwrap();
        assert!(table_has_column(&conn, "students", "parent_email").unwrap());
    }

    #[test]
    fn workspace_open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_workspace(dir.path(), Duration::from_secs(1)).unwrap();
        assert!(dir.path().join(DB_FILE_NAME).exists());
        assert_eq!(store.path(), Some(dir.path().join(DB_FILE_NAME).as_path()));
    }
}
