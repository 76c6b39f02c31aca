use crate::error::{CoreError, CoreResult};
use crate::model::{AttendanceRecord, Evaluation};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(crate) const COLUMNS: &str = "id, student_id, session_id, attendance_time, teacher_rating, \
                                  quiz_score, participation_rating, behavior_rating, \
                                  homework_status, notes, created_at, updated_at";

pub(crate) fn from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        session_id: r.get(2)?,
        attendance_time: r.get(3)?,
        teacher_rating: r.get(4)?,
        quiz_score: r.get(5)?,
        participation_rating: r.get(6)?,
        behavior_rating: r.get(7)?,
        homework_status: r.get(8)?,
        notes: r.get(9)?,
        created_at: r.get(10)?,
        updated_at: r.get(11)?,
    })
}

pub fn find(
    conn: &Connection,
    student_id: &str,
    session_id: &str,
) -> CoreResult<Option<AttendanceRecord>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM attendance WHERE student_id = ? AND session_id = ?",
                COLUMNS
            ),
            [student_id, session_id],
            from_row,
        )
        .optional()?)
}

/// Inserts one record. A second record for the same (student, session) pair
/// trips `UNIQUE(student_id, session_id)` and surfaces as `Conflict`.
pub fn insert(
    conn: &Connection,
    student_id: &str,
    session_id: &str,
    attendance_time: NaiveDateTime,
    eval: &Evaluation,
) -> CoreResult<AttendanceRecord> {
    let record = AttendanceRecord {
        id: super::new_id(),
        student_id: student_id.to_string(),
        session_id: session_id.to_string(),
        attendance_time,
        teacher_rating: eval.teacher_rating,
        quiz_score: eval.quiz_score,
        participation_rating: eval.participation_rating,
        behavior_rating: eval.behavior_rating,
        homework_status: eval.homework_status,
        notes: eval.notes.clone(),
        created_at: attendance_time,
        updated_at: attendance_time,
    };
    conn.execute(
        &format!(
            "INSERT INTO attendance({}) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            COLUMNS
        ),
        params![
            record.id,
            record.student_id,
            record.session_id,
            record.attendance_time,
            record.teacher_rating,
            record.quiz_score,
            record.participation_rating,
            record.behavior_rating,
            record.homework_status,
            record.notes,
            record.created_at,
            record.updated_at
        ],
    )?;
    Ok(record)
}

pub fn get(conn: &Connection, id: &str) -> CoreResult<Option<AttendanceRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM attendance WHERE id = ?", COLUMNS),
            [id],
            from_row,
        )
        .optional()?)
}

pub fn require(conn: &Connection, id: &str) -> CoreResult<AttendanceRecord> {
    get(conn, id)?.ok_or_else(|| CoreError::not_found("attendance record", id))
}

pub fn for_session(conn: &Connection, session_id: &str) -> CoreResult<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM attendance WHERE session_id = ? ORDER BY attendance_time",
        COLUMNS
    ))?;
    let rows = stmt
        .query_map([session_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Overlay the supplied evaluation fields onto the record.
pub fn apply_evaluation(
    conn: &Connection,
    id: &str,
    eval: &Evaluation,
    now: NaiveDateTime,
) -> CoreResult<AttendanceRecord> {
    let mut r = require(conn, id)?;
    if eval.teacher_rating.is_some() {
        r.teacher_rating = eval.teacher_rating;
    }
    if eval.quiz_score.is_some() {
        r.quiz_score = eval.quiz_score;
    }
    if eval.participation_rating.is_some() {
        r.participation_rating = eval.participation_rating;
    }
    if eval.behavior_rating.is_some() {
        r.behavior_rating = eval.behavior_rating;
    }
    if eval.homework_status.is_some() {
        r.homework_status = eval.homework_status;
    }
    if eval.notes.is_some() {
        r.notes = eval.notes.clone();
    }
    r.updated_at = now;
    conn.execute(
        "UPDATE attendance
         SET teacher_rating = ?, quiz_score = ?, participation_rating = ?, behavior_rating = ?,
             homework_status = ?, notes = ?, updated_at = ?
         WHERE id = ?",
        params![
            r.teacher_rating,
            r.quiz_score,
            r.participation_rating,
            r.behavior_rating,
            r.homework_status,
            r.notes,
            r.updated_at,
            id
        ],
    )?;
    Ok(r)
}

pub fn delete(conn: &Connection, id: &str) -> CoreResult<()> {
    let n = conn.execute("DELETE FROM attendance WHERE id = ?", [id])?;
    if n == 0 {
        return Err(CoreError::not_found("attendance record", id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{HomeworkStatus, Rating};
    use crate::store::Store;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .conn()
            .execute_batch(
                "INSERT INTO classes(id, name, grade_level, capacity, created_at, updated_at)
                   VALUES('c1', '1A', 'Grade 1', 30, '2026-03-02 07:00:00', '2026-03-02 07:00:00');
                 INSERT INTO students(id, barcode, name, class_id, active, created_at, updated_at)
                   VALUES('s1', 'B1', 'Ana', 'c1', 1, '2026-03-02 07:00:00', '2026-03-02 07:00:00');
                 INSERT INTO sessions(id, class_id, subject, date, start_time, status, quiz_total_score, created_at, updated_at)
                   VALUES('x1', 'c1', 'Math', '2026-03-02', '08:00:00', 'active', 10, '2026-03-02 07:00:00', '2026-03-02 07:00:00');",
            )
            .unwrap();
        store
    }

    #[test]
    fn second_record_for_pair_is_conflict() {
        let store = seeded();
        insert(store.conn(), "s1", "x1", t(8, 1), &Evaluation::default()).unwrap();
        let e = insert(store.conn(), "s1", "x1", t(8, 2), &Evaluation::default()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Conflict);
        assert_eq!(for_session(store.conn(), "x1").unwrap().len(), 1);
    }

    #[test]
    fn evaluation_overlays_only_supplied_fields() {
        let store = seeded();
        let first = Evaluation {
            teacher_rating: Some(Rating::Good),
            notes: Some("quiet".to_string()),
            ..Default::default()
        };
        let rec = insert(store.conn(), "s1", "x1", t(8, 1), &first).unwrap();

        let patch = Evaluation {
            quiz_score: Some(9),
            homework_status: Some(HomeworkStatus::Completed),
            ..Default::default()
        };
        let updated = apply_evaluation(store.conn(), &rec.id, &patch, t(9, 0)).unwrap();
        assert_eq!(updated.teacher_rating, Some(Rating::Good));
        assert_eq!(updated.notes.as_deref(), Some("quiet"));
        assert_eq!(updated.quiz_score, Some(9));
        assert_eq!(find(store.conn(), "s1", "x1").unwrap(), Some(updated));
    }

    #[test]
    fn quiz_score_check_constraint_holds() {
        let store = seeded();
        let bad = Evaluation {
            quiz_score: Some(101),
            ..Default::default()
        };
        let e = insert(store.conn(), "s1", "x1", t(8, 1), &bad).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Internal);
    }

    #[test]
    fn delete_missing_is_not_found() {
        let store = seeded();
        assert_eq!(delete(store.conn(), "nope").unwrap_err().kind(), ErrorKind::NotFound);
    }
}
