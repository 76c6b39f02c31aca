//! Report builders. Each report loads one [`Ledger`] and derives everything
//! from it, so figures inside a report always agree with each other.

use crate::analytics::{
    self, class_summary, rollup_ledger, student_summary, ClassSummaryView, GroupBy, Ledger,
    RollupRow, SessionRoster, StudentSummaryView, WindowFilter,
};
use crate::calc::{
    grade, rate, round2, AttendanceStats, PerformanceInput, PerformancePolicy, Punctuality, RiskPolicy,
    Tally, GRADES,
};
use crate::clock::Clock;
use crate::codec::ContactCodec;
use crate::error::{CoreError, CoreResult};
use crate::model::{AttendanceRecord, Contact, SessionStatus, StudentSummary};
use crate::store::Store;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const TOP_STUDENTS: usize = 10;

/// Window shared by all reports. Missing dates default to the current month
/// up to today.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReportParams {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub class_id: Option<String>,
    pub student_id: Option<String>,
}

impl ReportParams {
    pub fn resolve(&self, today: NaiveDate) -> CoreResult<(NaiveDate, NaiveDate)> {
        let to = self.date_to.unwrap_or(today);
        let from = self
            .date_from
            .unwrap_or_else(|| today.with_day(1).unwrap_or(today));
        if from > to {
            return Err(CoreError::validation("dateFrom", "must not be after dateTo"));
        }
        Ok((from, to))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportInfo {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub generated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRow {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub student_name: String,
    pub barcode: String,
    pub class_name: Option<String>,
    pub subject: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub punctuality: Punctuality,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceReportStats {
    pub total_attendance: u64,
    pub on_time_count: u64,
    pub late_count: u64,
    pub punctuality_rate: f64,
    pub avg_quiz: Option<f64>,
    pub quiz_submissions: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceReport {
    pub info: ReportInfo,
    pub statistics: AttendanceReportStats,
    pub data: Vec<AttendanceRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub info: ReportInfo,
    pub contact: Contact,
    #[serde(flatten)]
    pub summary: StudentSummaryView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassReport {
    pub info: ReportInfo,
    #[serde(flatten)]
    pub summary: ClassSummaryView,
    pub by_subject: Vec<RollupRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub info: ReportInfo,
    #[serde(flatten)]
    pub roster: SessionRoster,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceRow {
    pub student: StudentSummary,
    pub class_name: Option<String>,
    pub contact: Contact,
    pub total_sessions: u64,
    pub attended_sessions: u64,
    pub absent_sessions: u64,
    pub attendance_rate: f64,
    pub high_risk: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceReportStats {
    pub total_students_with_absences: usize,
    pub total_absences: u64,
    pub high_risk_students: usize,
    pub avg_absences_per_student: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceReport {
    pub info: ReportInfo,
    pub min_absences: u64,
    pub statistics: AbsenceReportStats,
    pub data: Vec<AbsenceRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRow {
    pub student: StudentSummary,
    pub class_name: Option<String>,
    #[serde(flatten)]
    pub input: PerformanceInput,
    pub quiz_submissions: u64,
    pub performance_score: f64,
    pub performance_grade: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct GradeCount {
    pub grade: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReportStats {
    pub total_students: usize,
    pub avg_performance_score: f64,
    pub grade_distribution: Vec<GradeCount>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub info: ReportInfo,
    pub statistics: PerformanceReportStats,
    pub data: Vec<PerformanceRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralStats {
    pub total_students: usize,
    pub total_classes: usize,
    pub total_sessions: usize,
    pub total_attendance_records: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopStudent {
    pub student: StudentSummary,
    pub class_name: Option<String>,
    pub stats: AttendanceStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryReport {
    pub info: ReportInfo,
    pub general: GeneralStats,
    pub class_statistics: Vec<RollupRow>,
    pub daily_statistics: Vec<RollupRow>,
    pub top_students: Vec<TopStudent>,
}

pub struct Reports<'a> {
    store: &'a Store,
    clock: &'a dyn Clock,
    codec: &'a dyn ContactCodec,
    risk: &'a RiskPolicy,
    performance: &'a PerformancePolicy,
}

impl<'a> Reports<'a> {
    pub fn new(
        store: &'a Store,
        clock: &'a dyn Clock,
        codec: &'a dyn ContactCodec,
        risk: &'a RiskPolicy,
        performance: &'a PerformancePolicy,
    ) -> Self {
        Self {
            store,
            clock,
            codec,
            risk,
            performance,
        }
    }

    fn window(&self, params: &ReportParams) -> CoreResult<(WindowFilter, ReportInfoDates)> {
        let (from, to) = params.resolve(self.clock.now().date())?;
        let mut filter = WindowFilter::between(from, to);
        filter.class_id = params.class_id.clone();
        Ok((filter, (Some(from), Some(to))))
    }

    fn info(&self, kind: &'static str, dates: ReportInfoDates) -> ReportInfo {
        ReportInfo {
            kind,
            date_from: dates.0,
            date_to: dates.1,
            generated_at: self.clock.now(),
        }
    }

    /// Every record of active and completed sessions in the window.
    pub fn attendance_report(&self, params: &ReportParams) -> CoreResult<AttendanceReport> {
        let (filter, dates) = self.window(params)?;
        let filter =
            filter.with_statuses(&[SessionStatus::Active, SessionStatus::Completed]);
        let ledger = Ledger::load(self.store, &filter)?;

        let mut data = Vec::new();
        let mut on_time = 0u64;
        let mut quiz_sum = 0i64;
        let mut quiz_count = 0u64;
        for session in ledger.sessions() {
            for r in ledger.records(&session.id) {
                if params.student_id.as_deref().is_some_and(|id| id != r.student_id) {
                    continue;
                }
                let Some(student) = ledger.student(&r.student_id) else { continue };
                let punctuality = Punctuality::classify(session, r.attendance_time);
                if !punctuality.is_late() {
                    on_time += 1;
                }
                if let Some(q) = r.quiz_score {
                    quiz_sum += q;
                    quiz_count += 1;
                }
                data.push(AttendanceRow {
                    record: r.clone(),
                    student_name: student.name.clone(),
                    barcode: student.barcode.clone(),
                    class_name: ledger.class_name(&session.class_id),
                    subject: session.subject.clone(),
                    date: session.date,
                    start_time: session.start_time,
                    end_time: session.end_time,
                    punctuality,
                });
            }
        }
        data.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| b.start_time.cmp(&a.start_time))
                .then_with(|| a.student_name.cmp(&b.student_name))
        });
        let total = data.len() as u64;
        Ok(AttendanceReport {
            info: self.info("attendance", dates),
            statistics: AttendanceReportStats {
                total_attendance: total,
                on_time_count: on_time,
                late_count: total - on_time,
                punctuality_rate: rate(on_time, total),
                avg_quiz: (quiz_count > 0).then(|| round2(quiz_sum as f64 / quiz_count as f64)),
                quiz_submissions: quiz_count,
            },
            data,
        })
    }

    pub fn student_report(&self, student_id: &str, params: &ReportParams) -> CoreResult<StudentReport> {
        let (filter, dates) = self.window(params)?;
        let summary = student_summary(self.store, student_id, &filter, self.risk)?;
        let student = crate::store::students::require(self.store.conn(), student_id)?;
        Ok(StudentReport {
            info: self.info("student", dates),
            contact: self.codec.open(&student.sealed)?,
            summary,
        })
    }

    pub fn class_report(&self, class_id: &str, params: &ReportParams) -> CoreResult<ClassReport> {
        let (mut filter, dates) = self.window(params)?;
        filter.class_id = Some(class_id.to_string());
        let summary = class_summary(self.store, class_id, &filter, self.risk)?;
        let by_subject = analytics::rollup(self.store, &filter, GroupBy::Subject)?;
        Ok(ClassReport {
            info: self.info("class", dates),
            summary,
            by_subject,
        })
    }

    pub fn session_report(&self, session_id: &str) -> CoreResult<SessionReport> {
        let roster = analytics::session_roster(self.store, session_id)?;
        Ok(SessionReport {
            info: self.info("session", (Some(roster.session.date), Some(roster.session.date))),
            roster,
        })
    }

    /// Students with at least `min_absences` missed completed sessions.
    pub fn absence_report(&self, params: &ReportParams, min_absences: u64) -> CoreResult<AbsenceReport> {
        let (filter, dates) = self.window(params)?;
        let ledger = Ledger::load(self.store, &filter)?;

        let mut data = Vec::new();
        for (id, tally) in ledger.tallies_by_student() {
            let stats = tally.stats();
            if stats.absent < min_absences.max(1) {
                continue;
            }
            let Some(student) = ledger.student(&id) else { continue };
            data.push(AbsenceRow {
                student: StudentSummary::from(student),
                class_name: student.class_id.as_deref().and_then(|c| ledger.class_name(c)),
                contact: self.codec.open(&student.sealed)?,
                total_sessions: stats.possible,
                attended_sessions: stats.present,
                absent_sessions: stats.absent,
                attendance_rate: stats.attendance_rate,
                high_risk: self.risk.is_high_risk(&stats),
            });
        }
        data.sort_by(|a, b| {
            b.absent_sessions
                .cmp(&a.absent_sessions)
                .then_with(|| a.student.name.cmp(&b.student.name))
        });
        let total_absences: u64 = data.iter().map(|r| r.absent_sessions).sum();
        let n = data.len();
        Ok(AbsenceReport {
            info: self.info("absence", dates),
            min_absences,
            statistics: AbsenceReportStats {
                total_students_with_absences: n,
                total_absences,
                high_risk_students: data.iter().filter(|r| r.high_risk).count(),
                avg_absences_per_student: if n > 0 {
                    round2(total_absences as f64 / n as f64)
                } else {
                    0.0
                },
            },
            data,
        })
    }

    pub fn performance_report(&self, params: &ReportParams) -> CoreResult<PerformanceReport> {
        let (filter, dates) = self.window(params)?;
        let ledger = Ledger::load(self.store, &filter)?;
        let data = performance_rows(&ledger, self.performance);

        let n = data.len();
        let total: f64 = data.iter().map(|r| r.performance_score).sum();
        Ok(PerformanceReport {
            info: self.info("performance", dates),
            statistics: PerformanceReportStats {
                total_students: n,
                avg_performance_score: if n > 0 { round2(total / n as f64) } else { 0.0 },
                grade_distribution: grade_distribution(&data),
            },
            data,
        })
    }

    pub fn summary_report(&self, params: &ReportParams) -> CoreResult<SummaryReport> {
        let (filter, dates) = self.window(params)?;
        let ledger = Ledger::load(self.store, &filter)?;

        let mut class_statistics = rollup_ledger(&ledger, GroupBy::Class);
        class_statistics.sort_by(|a, b| b.stats.attendance_rate.total_cmp(&a.stats.attendance_rate));
        let daily_statistics = rollup_ledger(&ledger, GroupBy::Day);

        let mut top: Vec<TopStudent> = ledger
            .tallies_by_student()
            .into_iter()
            .filter(|(_, t)| t.present > 0)
            .filter_map(|(id, t)| {
                let student = ledger.student(&id)?;
                Some(TopStudent {
                    student: StudentSummary::from(student),
                    class_name: student.class_id.as_deref().and_then(|c| ledger.class_name(c)),
                    stats: t.stats(),
                })
            })
            .collect();
        top.sort_by(|a, b| {
            b.stats
                .attendance_rate
                .total_cmp(&a.stats.attendance_rate)
                .then_with(|| {
                    b.stats
                        .avg_quiz
                        .unwrap_or(0.0)
                        .total_cmp(&a.stats.avg_quiz.unwrap_or(0.0))
                })
                .then_with(|| a.student.name.cmp(&b.student.name))
        });
        top.truncate(TOP_STUDENTS);

        Ok(SummaryReport {
            info: self.info("summary", dates),
            general: GeneralStats {
                total_students: ledger.active_student_count(),
                total_classes: ledger.class_count(),
                total_sessions: ledger.sessions().len(),
                total_attendance_records: ledger
                    .sessions()
                    .iter()
                    .map(|s| ledger.records(&s.id).len())
                    .sum(),
            },
            class_statistics,
            daily_statistics,
            top_students: top,
        })
    }
}

type ReportInfoDates = (Option<NaiveDate>, Option<NaiveDate>);

/// Scores every student with at least one record in the ledger, best quiz
/// average first.
pub fn performance_rows(ledger: &Ledger, policy: &PerformancePolicy) -> Vec<PerformanceRow> {
    let mut inputs: BTreeMap<String, (PerformanceInput, Tally)> = BTreeMap::new();
    for session in ledger.sessions() {
        for r in ledger.records(&session.id) {
            let e = inputs.entry(r.student_id.clone()).or_default();
            e.0.add(r);
            e.1.present(session, r);
        }
    }

    let mut data = Vec::new();
    for (id, (mut input, tally)) in inputs {
        let Some(student) = ledger.student(&id) else { continue };
        let stats = tally.stats();
        input.avg_quiz = stats.avg_quiz;
        let score = policy.score(&input);
        data.push(PerformanceRow {
            student: StudentSummary::from(student),
            class_name: student.class_id.as_deref().and_then(|c| ledger.class_name(c)),
            quiz_submissions: stats.quiz_submissions,
            performance_score: score,
            performance_grade: grade(score),
            input,
        });
    }
    data.sort_by(|a, b| {
        b.input
            .avg_quiz
            .unwrap_or(0.0)
            .total_cmp(&a.input.avg_quiz.unwrap_or(0.0))
            .then_with(|| b.input.attended_sessions.cmp(&a.input.attended_sessions))
            .then_with(|| a.student.name.cmp(&b.student.name))
    });
    data
}

/// One entry per grade band, best first, zero counts included.
pub fn grade_distribution(rows: &[PerformanceRow]) -> Vec<GradeCount> {
    GRADES
        .iter()
        .map(|&g| GradeCount {
            grade: g,
            count: rows.iter().filter(|r| r.performance_grade == g).count(),
        })
        .collect()
}
