//! Barcode check-in and manual attendance marking.
//!
//! Every write path runs in one `BEGIN IMMEDIATE` transaction: the session
//! status, the student's membership and the "not yet marked" check are read
//! under the same write lock that the insert takes.

use crate::calc::{minutes_late, Punctuality};
use crate::clock::Clock;
use crate::codec::ContactCodec;
use crate::error::{CoreError, CoreResult};
use crate::model::{AttendanceRecord, Contact, Evaluation, Session, SessionStatus, Student, StudentSummary};
use crate::store::students::NewStudent;
use crate::store::{attendance, sessions, students, Store};
use crate::validate;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInReceipt {
    pub record: AttendanceRecord,
    pub student: StudentSummary,
    pub punctuality: Punctuality,
    pub minutes_late: i64,
    /// Tells the scanning UI to move to the next row.
    pub auto_advance: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Marked(CheckInReceipt),
    /// Unknown barcode; the caller may offer quick registration.
    #[serde(rename_all = "camelCase")]
    StudentNotFound { barcode: String, session_id: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickRegister {
    pub barcode: String,
    pub name: String,
    pub session_id: String,
    pub parent_phone: Option<String>,
    pub emergency_phone: Option<String>,
    pub parent_email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAttendance {
    pub student_id: String,
    pub session_id: String,
    #[serde(flatten)]
    pub evaluation: Evaluation,
}

pub struct CheckIn<'a> {
    store: &'a Store,
    clock: &'a dyn Clock,
    codec: &'a dyn ContactCodec,
}

impl<'a> CheckIn<'a> {
    pub fn new(store: &'a Store, clock: &'a dyn Clock, codec: &'a dyn ContactCodec) -> Self {
        Self {
            store,
            clock,
            codec,
        }
    }

    pub fn scan(&self, barcode: &str, session_id: &str) -> CoreResult<ScanOutcome> {
        let barcode = validate::required_text("barcode", barcode, 1, 50)?;
        let tx = self.store.write_tx()?;
        let session = require_active(&tx, session_id)?;
        let Some(student) = students::find_by_barcode(&tx, &barcode)? else {
            info!(%barcode, session_id, "unknown barcode scanned");
            return Ok(ScanOutcome::StudentNotFound {
                barcode,
                session_id: session_id.to_string(),
            });
        };
        let receipt = self.mark(&tx, &session, &student, &Evaluation::default())?;
        tx.commit()?;
        Ok(ScanOutcome::Marked(receipt))
    }

    /// Registers a new student in the session's class and marks them present.
    /// Nothing persists unless both inserts succeed.
    pub fn quick_register_and_mark(&self, req: &QuickRegister) -> CoreResult<CheckInReceipt> {
        let barcode = validate::required_text("barcode", &req.barcode, 1, 50)?;
        let name = validate::required_text("name", &req.name, 2, 100)?;
        let contact = Contact {
            parent_phone: validate::optional_phone("parentPhone", req.parent_phone.as_deref())?,
            emergency_phone: validate::optional_phone(
                "emergencyPhone",
                req.emergency_phone.as_deref(),
            )?,
        };
        let parent_email = validate::optional_email("parentEmail", req.parent_email.as_deref())?;
        let sealed = self.codec.seal(&contact)?;

        let tx = self.store.write_tx()?;
        let session = require_active(&tx, &req.session_id)?;
        let now = self.clock.now();
        let student = students::insert(
            &tx,
            &NewStudent {
                barcode,
                name,
                class_id: Some(session.class_id.clone()),
                parent_email,
                sealed,
            },
            now,
        )?;
        let receipt = self.mark(&tx, &session, &student, &Evaluation::default())?;
        tx.commit()?;
        info!(student_id = %student.id, barcode = %student.barcode, "student quick-registered");
        Ok(receipt)
    }

    /// Manual marking with optional evaluation fields.
    pub fn mark_attendance(&self, req: &MarkAttendance) -> CoreResult<CheckInReceipt> {
        let evaluation = validate_evaluation(&req.evaluation)?;
        let tx = self.store.write_tx()?;
        let session = require_active(&tx, &req.session_id)?;
        let student = students::require(&tx, &req.student_id)?;
        let receipt = self.mark(&tx, &session, &student, &evaluation)?;
        tx.commit()?;
        Ok(receipt)
    }

    pub fn update_attendance(&self, record_id: &str, patch: &Evaluation) -> CoreResult<AttendanceRecord> {
        if patch.is_empty() {
            return Err(CoreError::validation("params", "no updatable field supplied"));
        }
        let patch = validate_evaluation(patch)?;
        let tx = self.store.write_tx()?;
        let record = attendance::apply_evaluation(&tx, record_id, &patch, self.clock.now())?;
        tx.commit()?;
        info!(record_id, "attendance evaluated");
        Ok(record)
    }

    pub fn delete_attendance(&self, record_id: &str) -> CoreResult<()> {
        let tx = self.store.write_tx()?;
        attendance::delete(&tx, record_id)?;
        tx.commit()?;
        info!(record_id, "attendance record deleted");
        Ok(())
    }

    fn mark(
        &self,
        conn: &Connection,
        session: &Session,
        student: &Student,
        evaluation: &Evaluation,
    ) -> CoreResult<CheckInReceipt> {
        if !student.active {
            warn!(student_id = %student.id, session_id = %session.id, "inactive student rejected");
            return Err(CoreError::Forbidden("student is inactive".to_string()));
        }
        if student.class_id.as_deref() != Some(session.class_id.as_str()) {
            warn!(student_id = %student.id, session_id = %session.id, "student from another class rejected");
            return Err(CoreError::Forbidden(
                "student does not belong to this class".to_string(),
            ));
        }
        if attendance::find(conn, &student.id, &session.id)?.is_some() {
            warn!(student_id = %student.id, session_id = %session.id, "duplicate check-in rejected");
            return Err(CoreError::Conflict("student already marked present".to_string()));
        }
        let now = self.clock.now();
        let record = attendance::insert(conn, &student.id, &session.id, now, evaluation)?;
        let receipt = build_receipt(session, student, record, now);
        info!(
            student_id = %student.id,
            session_id = %session.id,
            late = receipt.punctuality.is_late(),
            "attendance marked"
        );
        Ok(receipt)
    }
}

fn build_receipt(session: &Session, student: &Student, record: AttendanceRecord, at: NaiveDateTime) -> CheckInReceipt {
    CheckInReceipt {
        punctuality: Punctuality::classify(session, at),
        minutes_late: minutes_late(session, at),
        student: StudentSummary::from(student),
        record,
        auto_advance: true,
    }
}

fn require_active(conn: &Connection, session_id: &str) -> CoreResult<Session> {
    let session = sessions::require(conn, session_id)?;
    if session.status != SessionStatus::Active {
        return Err(CoreError::InvalidState(format!(
            "session is {}, check-in needs an active session",
            session.status.as_str()
        )));
    }
    Ok(session)
}

fn validate_evaluation(e: &Evaluation) -> CoreResult<Evaluation> {
    let mut out = e.clone();
    if let Some(q) = e.quiz_score {
        validate::int_range("quizScore", q, 0, 100)?;
    }
    if e.notes.is_some() {
        out.notes = validate::optional_text("notes", e.notes.as_deref(), 500)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::codec::PlainCodec;
    use crate::error::ErrorKind;
    use crate::model::{HomeworkStatus, Rating};
    use chrono::{Duration, NaiveDate};
    use std::time::Duration as StdDuration;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    const SEED: &str = "
        INSERT INTO classes(id, name, grade_level, capacity, created_at, updated_at)
          VALUES('c1', '1A', 'Grade 1', 30, '2026-03-01 07:00:00', '2026-03-01 07:00:00'),
                ('c2', '2B', 'Grade 2', 30, '2026-03-01 07:00:00', '2026-03-01 07:00:00');
        INSERT INTO students(id, barcode, name, class_id, active, created_at, updated_at)
          VALUES('s1', 'B1', 'Ana', 'c1', 1, '2026-03-01 07:00:00', '2026-03-01 07:00:00'),
                ('s2', 'B2', 'Ben', 'c1', 1, '2026-03-01 07:00:00', '2026-03-01 07:00:00'),
                ('s3', 'B3', 'Cai', 'c2', 1, '2026-03-01 07:00:00', '2026-03-01 07:00:00'),
                ('s4', 'B4', 'Dee', 'c1', 0, '2026-03-01 07:00:00', '2026-03-01 07:00:00');
        INSERT INTO sessions(id, class_id, subject, date, start_time, status, quiz_total_score, created_at, updated_at)
          VALUES('x1', 'c1', 'Math', '2026-03-02', '08:00:00', 'active', 10, '2026-03-02 07:00:00', '2026-03-02 07:00:00'),
                ('x2', 'c1', 'Art', '2026-03-01', '08:00:00', 'completed', 10, '2026-03-01 07:00:00', '2026-03-01 07:00:00');";

    fn setup() -> (Store, FixedClock) {
        let store = Store::open_in_memory().unwrap();
        store.conn().execute_batch(SEED).unwrap();
        (store, FixedClock::new(at(8, 5, 0)))
    }

    fn marked(o: ScanOutcome) -> CheckInReceipt {
        match o {
            ScanOutcome::Marked(r) => r,
            other => panic!("expected a check-in, got {:?}", other),
        }
    }

    #[test]
    fn scan_marks_once() {
        let (store, clock) = setup();
        let checkin = CheckIn::new(&store, &clock, &PlainCodec);
        let r = marked(checkin.scan("B1", "x1").unwrap());
        assert_eq!(r.student.name, "Ana");
        assert_eq!(r.punctuality, Punctuality::OnTime);
        assert!(r.auto_advance);

        let e = checkin.scan("B1", "x1").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Conflict);
        assert_eq!(attendance::for_session(store.conn(), "x1").unwrap().len(), 1);
    }

    #[test]
    fn scan_rejections() {
        let (store, clock) = setup();
        let checkin = CheckIn::new(&store, &clock, &PlainCodec);
        assert_eq!(checkin.scan("B1", "nope").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(checkin.scan("B1", "x2").unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(checkin.scan("B3", "x1").unwrap_err().kind(), ErrorKind::Forbidden);
        assert_eq!(checkin.scan("B4", "x1").unwrap_err().kind(), ErrorKind::Forbidden);
        match checkin.scan("NEW-1", "x1").unwrap() {
            ScanOutcome::StudentNotFound {
                barcode,
                session_id,
            } => {
                assert_eq!(barcode, "NEW-1");
                assert_eq!(session_id, "x1");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn punctuality_boundary_is_nine_hundred_seconds() {
        let (store, clock) = setup();
        let checkin = CheckIn::new(&store, &clock, &PlainCodec);
        clock.set(at(8, 15, 0));
        assert_eq!(marked(checkin.scan("B1", "x1").unwrap()).punctuality, Punctuality::OnTime);
        clock.advance(Duration::seconds(1));
        let late = marked(checkin.scan("B2", "x1").unwrap());
        assert_eq!(late.punctuality, Punctuality::Late);
        assert_eq!(late.minutes_late, 15);
    }

    #[test]
    fn quick_register_creates_student_in_session_class() {
        let (store, clock) = setup();
        let checkin = CheckIn::new(&store, &clock, &PlainCodec);
        let r = checkin
            .quick_register_and_mark(&QuickRegister {
                barcode: "NEW-1".to_string(),
                name: "Eve".to_string(),
                session_id: "x1".to_string(),
                parent_phone: Some("0501234567".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(r.student.class_id.as_deref(), Some("c1"));
        let s = students::find_by_barcode(store.conn(), "NEW-1").unwrap().unwrap();
        assert_eq!(s.sealed.parent_phone.as_deref(), Some("0501234567"));

        let dup = checkin
            .quick_register_and_mark(&QuickRegister {
                barcode: "B1".to_string(),
                name: "Copy".to_string(),
                session_id: "x1".to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(dup.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn quick_register_rolls_back_when_marking_fails() {
        let (store, clock) = setup();
        store
            .conn()
            .execute_batch(
                "CREATE TRIGGER fail_attendance BEFORE INSERT ON attendance
                 BEGIN SELECT RAISE(ABORT, 'boom'); END;",
            )
            .unwrap();
        let checkin = CheckIn::new(&store, &clock, &PlainCodec);
        let req = QuickRegister {
            barcode: "NEW-1".to_string(),
            name: "Eve".to_string(),
            session_id: "x1".to_string(),
            ..Default::default()
        };
        assert_eq!(
            checkin.quick_register_and_mark(&req).unwrap_err().kind(),
            ErrorKind::Internal
        );
        assert!(students::find_by_barcode(store.conn(), "NEW-1").unwrap().is_none());

        store.conn().execute_batch("DROP TRIGGER fail_attendance;").unwrap();
        checkin.quick_register_and_mark(&req).unwrap();
        assert!(students::find_by_barcode(store.conn(), "NEW-1").unwrap().is_some());
    }

    #[test]
    fn mark_attendance_validates_and_stores_evaluation() {
        let (store, clock) = setup();
        let checkin = CheckIn::new(&store, &clock, &PlainCodec);
        let bad = MarkAttendance {
            student_id: "s1".to_string(),
            session_id: "x1".to_string(),
            evaluation: Evaluation {
                quiz_score: Some(101),
                ..Default::default()
            },
        };
        assert_eq!(
            checkin.mark_attendance(&bad).unwrap_err().kind(),
            ErrorKind::ValidationError
        );

        let good = MarkAttendance {
            evaluation: Evaluation {
                quiz_score: Some(9),
                teacher_rating: Some(Rating::Excellent),
                homework_status: Some(HomeworkStatus::Completed),
                ..Default::default()
            },
            ..bad
        };
        let r = checkin.mark_attendance(&good).unwrap();
        assert_eq!(r.record.quiz_score, Some(9));
        assert_eq!(r.record.teacher_rating, Some(Rating::Excellent));

        let missing = MarkAttendance {
            student_id: "nope".to_string(),
            session_id: "x1".to_string(),
            evaluation: Evaluation::default(),
        };
        assert_eq!(checkin.mark_attendance(&missing).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn update_and_delete_records() {
        let (store, clock) = setup();
        let checkin = CheckIn::new(&store, &clock, &PlainCodec);
        let r = marked(checkin.scan("B1", "x1").unwrap());

        assert_eq!(
            checkin
                .update_attendance(&r.record.id, &Evaluation::default())
                .unwrap_err()
                .kind(),
            ErrorKind::ValidationError
        );
        let updated = checkin
            .update_attendance(
                &r.record.id,
                &Evaluation {
                    behavior_rating: Some(Rating::Good),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.behavior_rating, Some(Rating::Good));

        checkin.delete_attendance(&r.record.id).unwrap();
        assert_eq!(
            checkin.delete_attendance(&r.record.id).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn concurrent_scans_of_one_student_mark_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.sqlite3");
        {
            let store = Store::open(&path, StdDuration::from_secs(5)).unwrap();
            store.conn().execute_batch(SEED).unwrap();
        }

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = Store::open(&path, StdDuration::from_secs(5)).unwrap();
                    let clock = FixedClock::new(at(8, 5, 0));
                    CheckIn::new(&store, &clock, &PlainCodec)
                        .scan("B1", "x1")
                        .map(|_| ())
                        .map_err(|e| e.kind())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.contains(&Err(ErrorKind::Conflict)));

        let store = Store::open(&path, StdDuration::from_secs(5)).unwrap();
        assert_eq!(attendance::for_session(store.conn(), "x1").unwrap().len(), 1);
    }
}
