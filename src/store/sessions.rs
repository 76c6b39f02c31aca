use crate::error::{CoreError, CoreResult};
use crate::model::{Session, SessionStatus};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;

pub(crate) const COLUMNS: &str = "id, class_id, subject, description, date, start_time, end_time, \
                                  status, quiz_total_score, created_at, updated_at";

pub(crate) fn from_row(r: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: r.get(0)?,
        class_id: r.get(1)?,
        subject: r.get(2)?,
        description: r.get(3)?,
        date: r.get(4)?,
        start_time: r.get(5)?,
        end_time: r.get(6)?,
        status: r.get(7)?,
        quiz_total_score: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub class_id: String,
    pub subject: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub status: SessionStatus,
    pub quiz_total_score: i64,
}

/// Filters for session listings; every field narrows the result.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub class_id: Option<String>,
    pub status: Option<SessionStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub search: Option<String>,
}

pub fn insert(conn: &Connection, new: &NewSession, now: NaiveDateTime) -> CoreResult<Session> {
    let session = Session {
        id: super::new_id(),
        class_id: new.class_id.clone(),
        subject: new.subject.clone(),
        description: new.description.clone(),
        date: new.date,
        start_time: new.start_time,
        end_time: new.end_time,
        status: new.status,
        quiz_total_score: new.quiz_total_score,
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        &format!(
            "INSERT INTO sessions({}) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            COLUMNS
        ),
        params![
            session.id,
            session.class_id,
            session.subject,
            session.description,
            session.date,
            session.start_time,
            session.end_time,
            session.status,
            session.quiz_total_score,
            session.created_at,
            session.updated_at
        ],
    )?;
    Ok(session)
}

pub fn get(conn: &Connection, id: &str) -> CoreResult<Option<Session>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM sessions WHERE id = ?", COLUMNS),
            [id],
            from_row,
        )
        .optional()?)
}

pub fn require(conn: &Connection, id: &str) -> CoreResult<Session> {
    get(conn, id)?.ok_or_else(|| CoreError::not_found("session", id))
}

pub fn list(conn: &Connection, q: &SessionQuery) -> CoreResult<Vec<Session>> {
    let mut sql = format!(
        "SELECT {} FROM sessions s WHERE 1 = 1",
        prefixed("s", COLUMNS)
    );
    let mut args: Vec<Value> = Vec::new();
    if let Some(class_id) = &q.class_id {
        sql.push_str(" AND s.class_id = ?");
        args.push(Value::Text(class_id.clone()));
    }
    if let Some(status) = q.status {
        sql.push_str(" AND s.status = ?");
        args.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(from) = q.date_from {
        sql.push_str(" AND s.date >= ?");
        args.push(Value::Text(from.format("%Y-%m-%d").to_string()));
    }
    if let Some(to) = q.date_to {
        sql.push_str(" AND s.date <= ?");
        args.push(Value::Text(to.format("%Y-%m-%d").to_string()));
    }
    if let Some(search) = q.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        sql.push_str(" AND (s.subject LIKE ? OR s.description LIKE ?)");
        let pat = format!("%{}%", search);
        args.push(Value::Text(pat.clone()));
        args.push(Value::Text(pat));
    }
    sql.push_str(" ORDER BY s.date DESC, s.start_time DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Active sessions of `class_id` on `date`, optionally skipping one session.
pub fn active_for_class_on(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
    except_id: Option<&str>,
) -> CoreResult<Vec<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM sessions
         WHERE class_id = ? AND date = ? AND status = 'active' AND id IS NOT ?
         ORDER BY start_time",
        COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![class_id, date, except_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_active(conn: &Connection) -> CoreResult<Vec<Session>> {
    list(
        conn,
        &SessionQuery {
            status: Some(SessionStatus::Active),
            ..Default::default()
        },
    )
}

pub fn set_status(
    conn: &Connection,
    id: &str,
    status: SessionStatus,
    end_time: Option<NaiveTime>,
    now: NaiveDateTime,
) -> CoreResult<()> {
    let n = conn.execute(
        "UPDATE sessions SET status = ?, end_time = ?, updated_at = ? WHERE id = ?",
        params![status, end_time, now, id],
    )?;
    if n == 0 {
        return Err(CoreError::not_found("session", id));
    }
    Ok(())
}

/// Persist every mutable column of an already-validated session.
pub fn save(conn: &Connection, s: &Session) -> CoreResult<()> {
    conn.execute(
        "UPDATE sessions
         SET subject = ?, description = ?, date = ?, start_time = ?, end_time = ?,
             quiz_total_score = ?, status = ?, updated_at = ?
         WHERE id = ?",
        params![
            s.subject,
            s.description,
            s.date,
            s.start_time,
            s.end_time,
            s.quiz_total_score,
            s.status,
            s.updated_at,
            s.id
        ],
    )?;
    Ok(())
}

/// Removes the session and its attendance records, children first.
pub fn delete_with_records(conn: &Connection, id: &str) -> CoreResult<usize> {
    let records = conn.execute("DELETE FROM attendance WHERE session_id = ?", [id])?;
    conn.execute("DELETE FROM sessions WHERE id = ?", [id])?;
    Ok(records)
}

pub(crate) fn prefixed(alias: &str, columns: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{}.{}", alias, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
