//! Session state machine.
//!
//! ```text
//! scheduled ──┬──> active ──> completed
//!             └───────┴─────> cancelled
//! ```
//!
//! Sessions are created directly as `active`. `scheduled` only appears on
//! imported rows. Completed and cancelled are terminal.

use crate::analytics::{Ledger, Slot, WindowFilter};
use crate::calc::{minutes_late, AttendanceStats, Punctuality};
use crate::clock::Clock;
use crate::codec::ContactCodec;
use crate::error::{CoreError, CoreResult};
use crate::model::{AttendanceRecord, Contact, Session, SessionStatus, StudentSummary};
use crate::store::sessions::{self, NewSession, SessionQuery};
use crate::store::{classes, Store};
use crate::validate;
use chrono::{NaiveDate, NaiveTime, Timelike};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_QUIZ_TOTAL: i64 = 10;
const END_OF_DAY_SECS: u32 = 24 * 60 * 60;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSession {
    pub class_id: String,
    pub subject: String,
    pub description: Option<String>,
    pub date: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub quiz_total_score: Option<i64>,
}

/// Allow-listed session edits. Blank `description`/`endTime` clear the field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateSession {
    pub subject: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub quiz_total_score: Option<i64>,
}

impl UpdateSession {
    fn is_empty(&self) -> bool {
        self.subject.is_none()
            && self.description.is_none()
            && self.date.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.quiz_total_score.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentEntry {
    pub student: StudentSummary,
    pub contact: Contact,
    pub record: AttendanceRecord,
    pub punctuality: Punctuality,
    pub minutes_late: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsentEntry {
    pub student: StudentSummary,
    pub contact: Contact,
    pub parent_email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionOutcome {
    pub session: Session,
    pub class_name: Option<String>,
    pub present: Vec<PresentEntry>,
    pub absent: Vec<AbsentEntry>,
    pub stats: AttendanceStats,
}

pub struct SessionLifecycle<'a> {
    store: &'a Store,
    clock: &'a dyn Clock,
    codec: &'a dyn ContactCodec,
}

impl<'a> SessionLifecycle<'a> {
    pub fn new(store: &'a Store, clock: &'a dyn Clock, codec: &'a dyn ContactCodec) -> Self {
        Self {
            store,
            clock,
            codec,
        }
    }

    pub fn create_session(&self, req: &CreateSession) -> CoreResult<Session> {
        let subject = validate::required_text("subject", &req.subject, 2, 100)?;
        let description = validate::optional_text("description", req.description.as_deref(), 500)?;
        let date = validate::date("date", &req.date)?;
        let start_time = validate::time("startTime", &req.start_time)?;
        let end_time = optional_time("endTime", req.end_time.as_deref())?;
        check_interval(start_time, end_time)?;
        let quiz_total_score = validate::int_range(
            "quizTotalScore",
            req.quiz_total_score.unwrap_or(DEFAULT_QUIZ_TOTAL),
            1,
            100,
        )?;

        let tx = self.store.write_tx()?;
        classes::require(&tx, &req.class_id)?;
        ensure_no_overlap(&tx, &req.class_id, date, start_time, end_time, None)?;
        let session = sessions::insert(
            &tx,
            &NewSession {
                class_id: req.class_id.clone(),
                subject,
                description,
                date,
                start_time,
                end_time,
                status: SessionStatus::Active,
                quiz_total_score,
            },
            self.clock.now(),
        )?;
        tx.commit()?;
        info!(session_id = %session.id, class_id = %session.class_id, date = %session.date, "session started");
        Ok(session)
    }

    /// Completes an active session and snapshots who was there.
    pub fn end_session(&self, session_id: &str) -> CoreResult<EndSessionOutcome> {
        let tx = self.store.write_tx()?;
        let mut session = sessions::require(&tx, session_id)?;
        if session.status != SessionStatus::Active {
            return Err(CoreError::InvalidState(format!(
                "session is {}, only active sessions can be ended",
                session.status.as_str()
            )));
        }
        let now = self.clock.now();
        // The actual end always replaces the planned one.
        session.end_time = Some(now.time());
        session.status = SessionStatus::Completed;
        session.updated_at = now;
        sessions::set_status(&tx, &session.id, session.status, session.end_time, now)?;

        let ledger = Ledger::load_in(&tx, &WindowFilter::session(&session.id))?;
        let mut present = Vec::new();
        let mut absent = Vec::new();
        for slot in ledger.roster(&session) {
            match slot {
                Slot {
                    student,
                    record: Some(r),
                } => present.push(PresentEntry {
                    student: StudentSummary::from(student),
                    contact: self.codec.open(&student.sealed)?,
                    record: r.clone(),
                    punctuality: Punctuality::classify(&session, r.attendance_time),
                    minutes_late: minutes_late(&session, r.attendance_time),
                }),
                Slot {
                    student,
                    record: None,
                } => absent.push(AbsentEntry {
                    student: StudentSummary::from(student),
                    contact: self.codec.open(&student.sealed)?,
                    parent_email: student.parent_email.clone(),
                }),
            }
        }
        let stats = ledger.session_tally(&session).stats();
        let class_name = ledger.class_name(&session.class_id);
        tx.commit()?;

        info!(
            session_id = %session.id,
            present = stats.present,
            absent = stats.absent,
            rate = stats.attendance_rate,
            "session completed"
        );
        Ok(EndSessionOutcome {
            session,
            class_name,
            present,
            absent,
            stats,
        })
    }

    pub fn cancel_session(&self, session_id: &str) -> CoreResult<Session> {
        let tx = self.store.write_tx()?;
        let mut session = sessions::require(&tx, session_id)?;
        if session.status.is_terminal() {
            return Err(CoreError::InvalidState(format!(
                "session is already {}",
                session.status.as_str()
            )));
        }
        let now = self.clock.now();
        sessions::set_status(&tx, &session.id, SessionStatus::Cancelled, session.end_time, now)?;
        tx.commit()?;
        session.status = SessionStatus::Cancelled;
        session.updated_at = now;
        info!(session_id = %session.id, "session cancelled");
        Ok(session)
    }

    pub fn update_session(&self, session_id: &str, req: &UpdateSession) -> CoreResult<Session> {
        if req.is_empty() {
            return Err(CoreError::validation("params", "no updatable field supplied"));
        }
        let tx = self.store.write_tx()?;
        let mut s = sessions::require(&tx, session_id)?;
        if s.status.is_terminal() {
            return Err(CoreError::InvalidState(format!(
                "cannot edit a {} session",
                s.status.as_str()
            )));
        }
        let (old_date, old_start, old_end) = (s.date, s.start_time, s.end_time);

        if let Some(v) = &req.subject {
            s.subject = validate::required_text("subject", v, 2, 100)?;
        }
        if let Some(v) = &req.description {
            s.description = validate::optional_text("description", Some(v), 500)?;
        }
        if let Some(v) = &req.date {
            s.date = validate::date("date", v)?;
        }
        if let Some(v) = &req.start_time {
            s.start_time = validate::time("startTime", v)?;
        }
        if let Some(v) = &req.end_time {
            s.end_time = optional_time("endTime", Some(v))?;
        }
        if let Some(v) = req.quiz_total_score {
            s.quiz_total_score = validate::int_range("quizTotalScore", v, 1, 100)?;
        }
        check_interval(s.start_time, s.end_time)?;

        let moved = (s.date, s.start_time, s.end_time) != (old_date, old_start, old_end);
        if moved && s.status == SessionStatus::Active {
            ensure_no_overlap(&tx, &s.class_id, s.date, s.start_time, s.end_time, Some(&s.id))?;
        }
        s.updated_at = self.clock.now();
        sessions::save(&tx, &s)?;
        tx.commit()?;
        info!(session_id = %s.id, "session updated");
        Ok(s)
    }

    /// Removes a non-active session together with its records.
    pub fn delete_session(&self, session_id: &str) -> CoreResult<()> {
        let tx = self.store.write_tx()?;
        let session = sessions::require(&tx, session_id)?;
        if session.status == SessionStatus::Active {
            return Err(CoreError::Conflict(
                "cannot delete an active session; end or cancel it first".to_string(),
            ));
        }
        let removed = sessions::delete_with_records(&tx, session_id)?;
        tx.commit()?;
        info!(session_id, records = removed, "session deleted");
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> CoreResult<Session> {
        sessions::require(self.store.conn(), session_id)
    }

    pub fn list_sessions(&self, query: &SessionQuery) -> CoreResult<Vec<Session>> {
        sessions::list(self.store.conn(), query)
    }

    pub fn active_sessions(&self) -> CoreResult<Vec<Session>> {
        sessions::list_active(self.store.conn())
    }
}

fn optional_time(field: &str, value: Option<&str>) -> CoreResult<Option<NaiveTime>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => validate::time(field, v).map(Some),
    }
}

fn check_interval(start: NaiveTime, end: Option<NaiveTime>) -> CoreResult<()> {
    match end {
        Some(end) if end <= start => Err(CoreError::validation(
            "endTime",
            "must be later than startTime",
        )),
        _ => Ok(()),
    }
}

/// Half-open `[start, end)` in seconds since midnight; an open end runs to
/// midnight.
fn span(start: NaiveTime, end: Option<NaiveTime>) -> (u32, u32) {
    (
        start.num_seconds_from_midnight(),
        end.map_or(END_OF_DAY_SECS, |e| e.num_seconds_from_midnight()),
    )
}

pub fn overlaps(a: (NaiveTime, Option<NaiveTime>), b: (NaiveTime, Option<NaiveTime>)) -> bool {
    let (a0, a1) = span(a.0, a.1);
    let (b0, b1) = span(b.0, b.1);
    a0 < b1 && b0 < a1
}

fn ensure_no_overlap(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
    start: NaiveTime,
    end: Option<NaiveTime>,
    except_id: Option<&str>,
) -> CoreResult<()> {
    for other in sessions::active_for_class_on(conn, class_id, date, except_id)? {
        if overlaps((start, end), (other.start_time, other.end_time)) {
            return Err(CoreError::Conflict(format!(
                "class already has an active session at {} on {}",
                other.start_time.format("%H:%M"),
                date
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::codec::PlainCodec;
    use crate::error::ErrorKind;
    use crate::store::attendance;
    use crate::model::Evaluation;
    use chrono::NaiveDateTime;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    const SEED: &str = "
        INSERT INTO classes(id, name, grade_level, capacity, created_at, updated_at)
          VALUES('c1', '1A', 'Grade 1', 30, '2026-03-01 07:00:00', '2026-03-01 07:00:00');
        INSERT INTO students(id, barcode, name, class_id, parent_phone_enc, active, created_at, updated_at)
          VALUES('s1', 'B1', 'Ana', 'c1', '0501111111', 1, '2026-03-01 07:00:00', '2026-03-01 07:00:00'),
                ('s2', 'B2', 'Ben', 'c1', '0502222222', 1, '2026-03-01 07:00:00', '2026-03-01 07:00:00');";

    fn setup() -> (Store, FixedClock) {
        let store = Store::open_in_memory().unwrap();
        store.conn().execute_batch(SEED).unwrap();
        (store, FixedClock::new(at(7, 55)))
    }

    fn create(start: &str, end: Option<&str>) -> CreateSession {
        CreateSession {
            class_id: "c1".to_string(),
            subject: "Math".to_string(),
            date: "2026-03-02".to_string(),
            start_time: start.to_string(),
            end_time: end.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn overlap_uses_half_open_intervals() {
        assert!(!overlaps((t(8, 0), Some(t(9, 0))), (t(9, 0), Some(t(10, 0)))));
        assert!(overlaps((t(8, 0), Some(t(9, 0))), (t(8, 59), Some(t(10, 0)))));
        assert!(overlaps((t(8, 0), None), (t(23, 0), Some(t(23, 30)))));
        assert!(!overlaps((t(10, 0), None), (t(8, 0), Some(t(10, 0)))));
    }

    #[test]
    fn overlapping_active_session_is_conflict() {
        let (store, clock) = setup();
        let life = SessionLifecycle::new(&store, &clock, &PlainCodec);
        let first = life.create_session(&create("08:00", Some("09:00"))).unwrap();
        assert_eq!(first.status, SessionStatus::Active);
        assert_eq!(first.quiz_total_score, DEFAULT_QUIZ_TOTAL);

        let e = life.create_session(&create("08:30", None)).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Conflict);

        // Back-to-back is fine.
        life.create_session(&create("09:00", Some("10:00"))).unwrap();

        // Ended sessions no longer block the slot.
        life.end_session(&first.id).unwrap();
        life.create_session(&create("08:15", Some("08:45"))).unwrap();
    }

    #[test]
    fn create_validates_fields() {
        let (store, clock) = setup();
        let life = SessionLifecycle::new(&store, &clock, &PlainCodec);
        let e = life.create_session(&create("09:00", Some("08:00"))).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::ValidationError);

        let mut bad = create("08:00", None);
        bad.subject = "M".to_string();
        assert_eq!(life.create_session(&bad).unwrap_err().kind(), ErrorKind::ValidationError);

        let mut missing = create("08:00", None);
        missing.class_id = "nope".to_string();
        assert_eq!(life.create_session(&missing).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn end_session_snapshots_present_and_absent() {
        let (store, clock) = setup();
        let life = SessionLifecycle::new(&store, &clock, &PlainCodec);
        let s = life.create_session(&create("08:00", Some("09:00"))).unwrap();
        attendance::insert(store.conn(), "s1", &s.id, at(8, 20), &Evaluation::default()).unwrap();

        clock.set(at(8, 50));
        let out = life.end_session(&s.id).unwrap();
        assert_eq!(out.session.status, SessionStatus::Completed);
        assert_eq!(out.session.end_time, Some(t(8, 50)));
        assert_eq!(out.present.len(), 1);
        assert_eq!(out.present[0].punctuality, Punctuality::Late);
        assert_eq!(out.present[0].minutes_late, 20);
        assert_eq!(out.absent.len(), 1);
        assert_eq!(out.absent[0].student.name, "Ben");
        assert_eq!(out.absent[0].contact.parent_phone.as_deref(), Some("0502222222"));
        assert_eq!(out.stats.attendance_rate, 50.0);

        let stored = life.get_session(&s.id).unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);

        let e = life.end_session(&s.id).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidState);
        assert_eq!(life.cancel_session(&s.id).unwrap_err().kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn end_time_is_the_clock_even_off_schedule() {
        let (store, clock) = setup();
        let life = SessionLifecycle::new(&store, &clock, &PlainCodec);
        let open = life.create_session(&create("08:00", None)).unwrap();

        clock.set(
            NaiveDate::from_ymd_opt(2026, 3, 3)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
        );
        let out = life.end_session(&open.id).unwrap();
        assert_eq!(out.session.end_time, Some(t(9, 30)));
        assert_eq!(life.get_session(&open.id).unwrap().end_time, Some(t(9, 30)));

        clock.set(at(7, 55));
        let early = life.create_session(&create("10:00", Some("11:00"))).unwrap();
        clock.set(at(9, 0));
        let out = life.end_session(&early.id).unwrap();
        assert_eq!(out.session.end_time, Some(t(9, 0)));
        assert_eq!(life.get_session(&early.id).unwrap().end_time, Some(t(9, 0)));
    }

    #[test]
    fn end_races_scan_on_two_connections() {
        use crate::checkin::CheckIn;
        use std::sync::{Arc, Barrier};
        use std::time::Duration as StdDuration;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.sqlite3");
        let store = Store::open(&path, StdDuration::from_secs(5)).unwrap();
        store.conn().execute_batch(SEED).unwrap();
        let clock = FixedClock::new(at(7, 55));
        let life = SessionLifecycle::new(&store, &clock, &PlainCodec);

        for _ in 0..10 {
            let session_id = life.create_session(&create("08:00", None)).unwrap().id;
            let gate = Arc::new(Barrier::new(2));

            let ender = {
                let (path, gate, id) = (path.clone(), gate.clone(), session_id.clone());
                std::thread::spawn(move || {
                    let store = Store::open(&path, StdDuration::from_secs(5)).unwrap();
                    let clock = FixedClock::new(at(8, 30));
                    gate.wait();
                    SessionLifecycle::new(&store, &clock, &PlainCodec)
                        .end_session(&id)
                        .unwrap()
                })
            };
            let scanner = {
                let (path, gate, id) = (path.clone(), gate.clone(), session_id.clone());
                std::thread::spawn(move || {
                    let store = Store::open(&path, StdDuration::from_secs(5)).unwrap();
                    let clock = FixedClock::new(at(8, 10));
                    gate.wait();
                    CheckIn::new(&store, &clock, &PlainCodec)
                        .scan("B1", &id)
                        .map(|_| ())
                        .map_err(|e| e.kind())
                })
            };
            let outcome = ender.join().unwrap();
            let scanned = scanner.join().unwrap();

            let ana_present = outcome.present.iter().any(|p| p.student.id == "s1");
            match scanned {
                Ok(()) => assert!(ana_present),
                Err(kind) => {
                    assert_eq!(kind, ErrorKind::InvalidState);
                    assert!(!ana_present);
                    assert!(outcome.absent.iter().any(|a| a.student.id == "s1"));
                }
            }
            let stored = attendance::for_session(store.conn(), &session_id).unwrap();
            assert_eq!(stored.len(), outcome.present.len());
            assert_eq!(outcome.present.len() + outcome.absent.len(), 2);
        }
    }

    #[test]
    fn cancel_then_delete() {
        let (store, clock) = setup();
        let life = SessionLifecycle::new(&store, &clock, &PlainCodec);
        let s = life.create_session(&create("08:00", None)).unwrap();
        attendance::insert(store.conn(), "s1", &s.id, at(8, 1), &Evaluation::default()).unwrap();

        assert_eq!(life.delete_session(&s.id).unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(
            life.cancel_session(&s.id).unwrap().status,
            SessionStatus::Cancelled
        );
        life.delete_session(&s.id).unwrap();
        assert_eq!(life.get_session(&s.id).unwrap_err().kind(), ErrorKind::NotFound);
        assert!(attendance::for_session(store.conn(), &s.id).unwrap().is_empty());
    }

    #[test]
    fn update_rechecks_overlap_and_rejects_terminal() {
        let (store, clock) = setup();
        let life = SessionLifecycle::new(&store, &clock, &PlainCodec);
        life.create_session(&create("08:00", Some("09:00"))).unwrap();
        let b = life.create_session(&create("10:00", Some("11:00"))).unwrap();

        let empty = UpdateSession::default();
        assert_eq!(
            life.update_session(&b.id, &empty).unwrap_err().kind(),
            ErrorKind::ValidationError
        );

        let clash = UpdateSession {
            start_time: Some("08:30".to_string()),
            ..Default::default()
        };
        assert_eq!(life.update_session(&b.id, &clash).unwrap_err().kind(), ErrorKind::Conflict);

        let rename = UpdateSession {
            subject: Some("Science".to_string()),
            quiz_total_score: Some(20),
            ..Default::default()
        };
        let updated = life.update_session(&b.id, &rename).unwrap();
        assert_eq!(updated.subject, "Science");
        assert_eq!(updated.quiz_total_score, 20);

        life.cancel_session(&b.id).unwrap();
        assert_eq!(
            life.update_session(&b.id, &rename).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }

    #[test]
    fn list_and_active_views() {
        let (store, clock) = setup();
        let life = SessionLifecycle::new(&store, &clock, &PlainCodec);
        let a = life.create_session(&create("08:00", Some("09:00"))).unwrap();
        life.create_session(&create("10:00", Some("11:00"))).unwrap();
        life.end_session(&a.id).unwrap();

        assert_eq!(life.active_sessions().unwrap().len(), 1);
        let done = life
            .list_sessions(&SessionQuery {
                status: Some(SessionStatus::Completed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, a.id);
    }
}
