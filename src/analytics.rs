//! Snapshot loading and grouped statistics.
//!
//! A [`Ledger`] is filled inside one transaction: sessions, the students and
//! classes they refer to, and their attendance records. Every number built on
//! top of it therefore describes one fixed point in time, even while check-ins
//! keep arriving on other connections.

use crate::calc::{minutes_late, AttendanceStats, Punctuality, RiskPolicy, Tally};
use crate::error::{CoreError, CoreResult};
use crate::model::{AttendanceRecord, Class, Session, SessionStatus, Student, StudentSummary};
use crate::store::{attendance, classes, sessions, students, Store};
use chrono::{Datelike, NaiveDate};
use rusqlite::types::Value;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Which sessions a ledger covers. Dates are inclusive.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WindowFilter {
    pub class_id: Option<String>,
    pub student_id: Option<String>,
    pub session_id: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Empty means every status.
    pub statuses: Vec<SessionStatus>,
}

impl Default for WindowFilter {
    fn default() -> Self {
        Self {
            class_id: None,
            student_id: None,
            session_id: None,
            date_from: None,
            date_to: None,
            statuses: vec![SessionStatus::Completed],
        }
    }
}

impl WindowFilter {
    pub fn between(date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            date_from: Some(date_from),
            date_to: Some(date_to),
            ..Default::default()
        }
    }

    /// A single session regardless of its status.
    pub fn session(session_id: &str) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            statuses: Vec::new(),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[SessionStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut sql = String::from(" WHERE 1 = 1");
        let mut args = Vec::new();
        if let Some(id) = &self.session_id {
            sql.push_str(" AND s.id = ?");
            args.push(Value::Text(id.clone()));
        }
        if let Some(id) = &self.class_id {
            sql.push_str(" AND s.class_id = ?");
            args.push(Value::Text(id.clone()));
        }
        if let Some(d) = self.date_from {
            sql.push_str(" AND s.date >= ?");
            args.push(Value::Text(d.format("%Y-%m-%d").to_string()));
        }
        if let Some(d) = self.date_to {
            sql.push_str(" AND s.date <= ?");
            args.push(Value::Text(d.format("%Y-%m-%d").to_string()));
        }
        if !self.statuses.is_empty() {
            let marks = vec!["?"; self.statuses.len()].join(", ");
            sql.push_str(&format!(" AND s.status IN ({})", marks));
            for st in &self.statuses {
                args.push(Value::Text(st.as_str().to_string()));
            }
        }
        (sql, args)
    }
}

/// One roster member of one session.
#[derive(Debug, Clone, Copy)]
pub struct Slot<'a> {
    pub student: &'a Student,
    pub record: Option<&'a AttendanceRecord>,
}

pub struct Ledger {
    sessions: Vec<Session>,
    students: HashMap<String, Student>,
    classes: HashMap<String, Class>,
    records: HashMap<String, Vec<AttendanceRecord>>,
    members: HashMap<String, Vec<String>>,
}

impl Ledger {
    /// Loads the window inside its own read transaction.
    pub fn load(store: &Store, filter: &WindowFilter) -> CoreResult<Ledger> {
        let tx = store.read_tx()?;
        let ledger = Ledger::load_in(&tx, filter)?;
        tx.commit()?;
        Ok(ledger)
    }

    /// Loads the window on a connection whose transaction the caller owns.
    pub fn load_in(conn: &Connection, filter: &WindowFilter) -> CoreResult<Ledger> {
        let (where_sql, args) = filter.where_clause();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions s{} ORDER BY s.date, s.start_time",
            sessions::prefixed("s", sessions::COLUMNS),
            where_sql
        ))?;
        let mut session_rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), sessions::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM attendance a JOIN sessions s ON s.id = a.session_id{}
             ORDER BY a.attendance_time",
            sessions::prefixed("a", attendance::COLUMNS),
            where_sql
        ))?;
        let mut records: HashMap<String, Vec<AttendanceRecord>> = HashMap::new();
        for r in stmt.query_map(rusqlite::params_from_iter(args.iter()), attendance::from_row)? {
            let r = r?;
            records.entry(r.session_id.clone()).or_default().push(r);
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM students ORDER BY name, barcode",
            students::COLUMNS
        ))?;
        let all_students = stmt
            .query_map([], students::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut members: HashMap<String, Vec<String>> = HashMap::new();
        for s in all_students.iter().filter(|s| s.active) {
            if let Some(class_id) = &s.class_id {
                members.entry(class_id.clone()).or_default().push(s.id.clone());
            }
        }
        let students: HashMap<String, Student> =
            all_students.into_iter().map(|s| (s.id.clone(), s)).collect();

        let mut stmt = conn.prepare(&format!("SELECT {} FROM classes", classes::COLUMNS))?;
        let classes: HashMap<String, Class> = stmt
            .query_map([], classes::from_row)?
            .map(|r| r.map(|c| (c.id.clone(), c)))
            .collect::<Result<_, _>>()?;

        let mut ledger = Ledger {
            sessions: Vec::new(),
            students,
            classes,
            records,
            members,
        };
        if let Some(student_id) = &filter.student_id {
            session_rows.retain(|s| ledger.on_roster(s, student_id));
        }
        ledger.sessions = session_rows;
        debug!(
            sessions = ledger.sessions.len(),
            records = ledger.records.values().map(Vec::len).sum::<usize>(),
            "ledger loaded"
        );
        Ok(ledger)
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn student(&self, id: &str) -> Option<&Student> {
        self.students.get(id)
    }

    pub fn class(&self, id: &str) -> Option<&Class> {
        self.classes.get(id)
    }

    pub fn active_student_count(&self) -> usize {
        self.students.values().filter(|s| s.active).count()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn class_name(&self, id: &str) -> Option<String> {
        self.classes.get(id).map(|c| c.name.clone())
    }

    pub fn records(&self, session_id: &str) -> &[AttendanceRecord] {
        self.records.get(session_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn on_roster(&self, session: &Session, student_id: &str) -> bool {
        let member = self
            .members
            .get(&session.class_id)
            .is_some_and(|ids| ids.iter().any(|id| id == student_id));
        member || self.records(&session.id).iter().any(|r| r.student_id == student_id)
    }

    /// Active class members first (name order), then record holders who are
    /// no longer members, in check-in order.
    pub fn roster(&self, session: &Session) -> Vec<Slot<'_>> {
        let recs = self.records(&session.id);
        let mut slots = Vec::new();
        if let Some(ids) = self.members.get(&session.class_id) {
            for id in ids {
                if let Some(student) = self.students.get(id) {
                    slots.push(Slot {
                        student,
                        record: recs.iter().find(|r| &r.student_id == id),
                    });
                }
            }
        }
        for r in recs {
            if slots.iter().any(|s| s.student.id == r.student_id) {
                continue;
            }
            if let Some(student) = self.students.get(&r.student_id) {
                slots.push(Slot {
                    student,
                    record: Some(r),
                });
            }
        }
        slots
    }

    pub fn session_tally(&self, session: &Session) -> Tally {
        let mut t = Tally::default();
        for slot in self.roster(session) {
            count(&mut t, session, slot);
        }
        t
    }

    /// Tally of one student across every session of the ledger.
    pub fn student_tally(&self, student_id: &str) -> Tally {
        let mut t = Tally::default();
        for session in &self.sessions {
            if let Some(slot) = self
                .roster(session)
                .into_iter()
                .find(|s| s.student.id == student_id)
            {
                count(&mut t, session, slot);
            }
        }
        t
    }

    pub fn total_tally(&self) -> Tally {
        let mut t = Tally::default();
        for s in &self.sessions {
            t.merge(&self.session_tally(s));
        }
        t
    }

    /// Per-student tallies, keyed by student id.
    pub fn tallies_by_student(&self) -> BTreeMap<String, Tally> {
        let mut out: BTreeMap<String, Tally> = BTreeMap::new();
        for session in &self.sessions {
            for slot in self.roster(session) {
                count(out.entry(slot.student.id.clone()).or_default(), session, slot);
            }
        }
        out
    }
}

fn count(t: &mut Tally, session: &Session, slot: Slot<'_>) {
    match slot.record {
        Some(r) => t.present(session, r),
        None => t.absent(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session: Session,
    pub class_name: Option<String>,
    pub stats: AttendanceStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRow {
    pub student: StudentSummary,
    pub present: bool,
    pub record: Option<AttendanceRecord>,
    pub punctuality: Option<Punctuality>,
    pub minutes_late: Option<i64>,
}

impl RosterRow {
    pub fn from_slot(session: &Session, slot: Slot<'_>) -> Self {
        RosterRow {
            student: StudentSummary::from(slot.student),
            present: slot.record.is_some(),
            record: slot.record.cloned(),
            punctuality: slot
                .record
                .map(|r| Punctuality::classify(session, r.attendance_time)),
            minutes_late: slot.record.map(|r| minutes_late(session, r.attendance_time)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRoster {
    pub session: Session,
    pub class_name: Option<String>,
    pub stats: AttendanceStats,
    pub entries: Vec<RosterRow>,
}

fn one_session(store: &Store, session_id: &str) -> CoreResult<(Ledger, Session)> {
    let ledger = Ledger::load(store, &WindowFilter::session(session_id))?;
    let session = ledger
        .session(session_id)
        .cloned()
        .ok_or_else(|| CoreError::not_found("session", session_id))?;
    Ok((ledger, session))
}

pub fn session_stats(store: &Store, session_id: &str) -> CoreResult<SessionStats> {
    let (ledger, session) = one_session(store, session_id)?;
    Ok(SessionStats {
        class_name: ledger.class_name(&session.class_id),
        stats: ledger.session_tally(&session).stats(),
        session,
    })
}

pub fn session_roster(store: &Store, session_id: &str) -> CoreResult<SessionRoster> {
    let (ledger, session) = one_session(store, session_id)?;
    let entries = ledger
        .roster(&session)
        .into_iter()
        .map(|slot| RosterRow::from_slot(&session, slot))
        .collect();
    Ok(SessionRoster {
        class_name: ledger.class_name(&session.class_id),
        stats: ledger.session_tally(&session).stats(),
        entries,
        session,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentHistoryRow {
    pub session_id: String,
    pub subject: String,
    pub date: NaiveDate,
    pub present: bool,
    pub punctuality: Option<Punctuality>,
    pub record: Option<AttendanceRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummaryView {
    pub student: StudentSummary,
    pub active: bool,
    pub class_name: Option<String>,
    pub stats: AttendanceStats,
    pub high_risk: bool,
    pub history: Vec<StudentHistoryRow>,
}

pub fn student_summary(
    store: &Store,
    student_id: &str,
    window: &WindowFilter,
    policy: &RiskPolicy,
) -> CoreResult<StudentSummaryView> {
    let mut filter = window.clone();
    filter.student_id = Some(student_id.to_string());
    let ledger = Ledger::load(store, &filter)?;
    let student = ledger
        .student(student_id)
        .ok_or_else(|| CoreError::not_found("student", student_id))?;

    let mut history = Vec::new();
    for session in ledger.sessions().iter().rev() {
        let record = ledger
            .records(&session.id)
            .iter()
            .find(|r| r.student_id == student_id);
        history.push(StudentHistoryRow {
            session_id: session.id.clone(),
            subject: session.subject.clone(),
            date: session.date,
            present: record.is_some(),
            punctuality: record.map(|r| Punctuality::classify(session, r.attendance_time)),
            record: record.cloned(),
        });
    }
    let stats = ledger.student_tally(student_id).stats();
    Ok(StudentSummaryView {
        student: StudentSummary::from(student),
        active: student.active,
        class_name: student.class_id.as_deref().and_then(|c| ledger.class_name(c)),
        high_risk: policy.is_high_risk(&stats),
        stats,
        history,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStudentRow {
    pub student: StudentSummary,
    pub stats: AttendanceStats,
    pub high_risk: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummaryView {
    pub class: Class,
    pub student_count: usize,
    pub session_count: usize,
    pub stats: AttendanceStats,
    pub high_risk_count: usize,
    pub students: Vec<ClassStudentRow>,
}

pub fn class_summary(
    store: &Store,
    class_id: &str,
    window: &WindowFilter,
    policy: &RiskPolicy,
) -> CoreResult<ClassSummaryView> {
    let mut filter = window.clone();
    filter.class_id = Some(class_id.to_string());
    let ledger = Ledger::load(store, &filter)?;
    let class = ledger
        .class(class_id)
        .cloned()
        .ok_or_else(|| CoreError::not_found("class", class_id))?;

    let tallies = ledger.tallies_by_student();
    let mut rows: Vec<ClassStudentRow> = Vec::new();
    let member_ids = ledger.members.get(class_id).cloned().unwrap_or_default();
    for id in member_ids.iter().chain(tallies.keys().filter(|k| !member_ids.contains(k))) {
        let Some(student) = ledger.student(id) else { continue };
        let stats = tallies.get(id).cloned().unwrap_or_default().stats();
        rows.push(ClassStudentRow {
            student: StudentSummary::from(student),
            high_risk: policy.is_high_risk(&stats),
            stats,
        });
    }
    rows.sort_by(|a, b| {
        b.stats
            .attendance_rate
            .total_cmp(&a.stats.attendance_rate)
            .then_with(|| a.student.name.cmp(&b.student.name))
    });

    Ok(ClassSummaryView {
        student_count: member_ids.len(),
        session_count: ledger.sessions().len(),
        stats: ledger.total_tally().stats(),
        high_risk_count: rows.iter().filter(|r| r.high_risk).count(),
        students: rows,
        class,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Class,
    Student,
    Subject,
    Day,
    Week,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupRow {
    pub key: String,
    pub label: String,
    pub sessions: u64,
    pub stats: AttendanceStats,
}

pub fn rollup(store: &Store, window: &WindowFilter, group_by: GroupBy) -> CoreResult<Vec<RollupRow>> {
    let ledger = Ledger::load(store, window)?;
    Ok(rollup_ledger(&ledger, group_by))
}

/// Groups are returned in key order.
pub fn rollup_ledger(ledger: &Ledger, group_by: GroupBy) -> Vec<RollupRow> {
    let mut groups: BTreeMap<String, (String, u64, Tally)> = BTreeMap::new();
    for session in ledger.sessions() {
        let (key, label) = match group_by {
            GroupBy::Student => {
                for slot in ledger.roster(session) {
                    let g = groups
                        .entry(slot.student.id.clone())
                        .or_insert_with(|| (slot.student.name.clone(), 0, Tally::default()));
                    g.1 += 1;
                    count(&mut g.2, session, slot);
                }
                continue;
            }
            GroupBy::Class => (
                session.class_id.clone(),
                ledger
                    .class_name(&session.class_id)
                    .unwrap_or_else(|| session.class_id.clone()),
            ),
            GroupBy::Subject => (session.subject.clone(), session.subject.clone()),
            GroupBy::Day => {
                let d = session.date.format("%Y-%m-%d").to_string();
                (d.clone(), d)
            }
            GroupBy::Week => {
                let w = session.date.iso_week();
                let k = format!("{}-W{:02}", w.year(), w.week());
                (k.clone(), k)
            }
        };
        let g = groups
            .entry(key)
            .or_insert_with(|| (label, 0, Tally::default()));
        g.1 += 1;
        g.2.merge(&ledger.session_tally(session));
    }
    groups
        .into_iter()
        .map(|(key, (label, sessions, tally))| RollupRow {
            key,
            label,
            sessions,
            stats: tally.stats(),
        })
        .collect()
}
