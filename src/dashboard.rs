//! Landing-page figures, alerts, activity feed and chart series. Every view
//! reads inside one transaction.

use crate::analytics::{rollup_ledger, GroupBy, Ledger, RollupRow, WindowFilter};
use crate::calc::{AttendanceStats, PerformancePolicy, RiskPolicy};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::model::SessionStatus;
use crate::reports::{grade_distribution, performance_rows};
use crate::store::Store;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const TOP_CLASSES: usize = 5;
const TOP_STUDENTS: usize = 10;
const FREQUENT_ABSENTEE_ALERTS: usize = 5;
const MAX_ALERTS: usize = 10;
const MAX_RECENT: usize = 100;

const LIVE: [SessionStatus; 2] = [SessionStatus::Active, SessionStatus::Completed];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicStats {
    pub total_students: i64,
    pub total_classes: i64,
    pub active_sessions: i64,
    pub completed_sessions: i64,
    pub today_attendance: i64,
    pub today_unique_students: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStats {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub sessions: usize,
    pub attendance: usize,
    pub unique_students: usize,
    pub stats: AttendanceStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub basic: BasicStats,
    pub today: PeriodStats,
    pub week: PeriodStats,
    pub month: PeriodStats,
    pub top_classes: Vec<RollupRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Danger,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub severity: Severity,
    pub title: String,
    pub message: String,
    /// Id of the student, session or class the alert is about.
    pub subject_id: String,
    pub raised_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alerts {
    pub alerts: Vec<Alert>,
    pub total_alerts: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    #[default]
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub period: Period,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub class_stats: Vec<RollupRow>,
    pub subject_stats: Vec<RollupRow>,
    /// Most sessions attended first, then best quiz average.
    pub top_students: Vec<RollupRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Attendance,
    Session,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub kind: ActivityKind,
    pub at: NaiveDateTime,
    pub session_id: String,
    pub subject: String,
    pub class_name: Option<String>,
    pub student_id: Option<String>,
    pub student_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    AttendanceTrend,
    ClassDistribution,
    PerformanceDistribution,
    WeeklyComparison,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Line,
    Doughnut,
    Pie,
    Bar,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub label: &'static str,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub kind: ChartKind,
    pub chart_type: ChartType,
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

/// Look-back for the trend and comparison charts.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ChartRange {
    pub days: i64,
    pub weeks: i64,
}

impl Default for ChartRange {
    fn default() -> Self {
        Self { days: 7, weeks: 4 }
    }
}

pub struct Dashboard<'a> {
    store: &'a Store,
    clock: &'a dyn Clock,
    risk: &'a RiskPolicy,
    performance: &'a PerformancePolicy,
}

fn month_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = today.with_day(1).unwrap_or(today);
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    let last = next.map_or(today, |n| n - Duration::days(1));
    (first, last)
}

fn week_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
    (monday, monday + Duration::days(6))
}

fn year_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = today.with_ordinal(1).unwrap_or(today);
    let last = NaiveDate::from_ymd_opt(today.year(), 12, 31).unwrap_or(today);
    (first, last)
}

fn period_bounds(period: Period, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    match period {
        Period::Week => week_bounds(today),
        Period::Month => month_bounds(today),
        Period::Year => year_bounds(today),
    }
}

fn in_range(field: &str, v: i64, min: i64, max: i64) -> CoreResult<i64> {
    if !(min..=max).contains(&v) {
        return Err(CoreError::validation(
            field,
            format!("must be between {} and {}", min, max),
        ));
    }
    Ok(v)
}

fn series(label: &'static str, rows: &[RollupRow], f: impl Fn(&RollupRow) -> f64) -> Series {
    Series {
        label,
        data: rows.iter().map(f).collect(),
    }
}

fn period(conn: &Connection, from: NaiveDate, to: NaiveDate) -> CoreResult<PeriodStats> {
    let ledger = Ledger::load_in(conn, &WindowFilter::between(from, to).with_statuses(&LIVE))?;
    let mut attendance = 0;
    let mut unique = HashSet::new();
    for s in ledger.sessions() {
        for r in ledger.records(&s.id) {
            attendance += 1;
            unique.insert(r.student_id.as_str());
        }
    }
    Ok(PeriodStats {
        date_from: from,
        date_to: to,
        sessions: ledger.sessions().len(),
        attendance,
        unique_students: unique.len(),
        stats: ledger.total_tally().stats(),
    })
}

fn count(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> CoreResult<i64> {
    Ok(conn.query_row(sql, args, |r| r.get(0))?)
}

impl<'a> Dashboard<'a> {
    pub fn new(
        store: &'a Store,
        clock: &'a dyn Clock,
        risk: &'a RiskPolicy,
        performance: &'a PerformancePolicy,
    ) -> Self {
        Self {
            store,
            clock,
            risk,
            performance,
        }
    }

    pub fn overview(&self) -> CoreResult<Overview> {
        let today = self.clock.now().date();
        let tx = self.store.read_tx()?;

        let basic = BasicStats {
            total_students: count(&tx, "SELECT COUNT(*) FROM students WHERE active = 1", &[])?,
            total_classes: count(&tx, "SELECT COUNT(*) FROM classes", &[])?,
            active_sessions: count(&tx, "SELECT COUNT(*) FROM sessions WHERE status = 'active'", &[])?,
            completed_sessions: count(
                &tx,
                "SELECT COUNT(*) FROM sessions WHERE status = 'completed'",
                &[],
            )?,
            today_attendance: count(
                &tx,
                "SELECT COUNT(*) FROM attendance WHERE date(attendance_time) = ?",
                &[&today],
            )?,
            today_unique_students: count(
                &tx,
                "SELECT COUNT(DISTINCT student_id) FROM attendance WHERE date(attendance_time) = ?",
                &[&today],
            )?,
        };

        let (week_from, week_to) = week_bounds(today);
        let (month_from, month_to) = month_bounds(today);
        let today_stats = period(&tx, today, today)?;
        let week = period(&tx, week_from, week_to)?;
        let month = period(&tx, month_from, month_to)?;

        let completed_month = Ledger::load_in(&tx, &WindowFilter::between(month_from, month_to))?;
        let mut top_classes = rollup_ledger(&completed_month, GroupBy::Class);
        top_classes.sort_by(|a, b| b.stats.attendance_rate.total_cmp(&a.stats.attendance_rate));
        top_classes.truncate(TOP_CLASSES);
        tx.commit()?;

        Ok(Overview {
            basic,
            today: today_stats,
            week,
            month,
            top_classes,
        })
    }

    /// Danger before warning before info; at most ten are returned.
    pub fn alerts(&self) -> CoreResult<Alerts> {
        let now = self.clock.now();
        let today = now.date();
        let tx = self.store.read_tx()?;
        let mut alerts = Vec::new();

        let (month_from, month_to) = month_bounds(today);
        let month = Ledger::load_in(&tx, &WindowFilter::between(month_from, month_to))?;
        let mut absentees: Vec<_> = month
            .tallies_by_student()
            .into_iter()
            .filter(|(_, t)| self.risk.is_frequent_absentee(t.absent_count()))
            .collect();
        absentees.sort_by(|a, b| b.1.absent_count().cmp(&a.1.absent_count()));
        for (id, t) in absentees.into_iter().take(FREQUENT_ABSENTEE_ALERTS) {
            let Some(student) = month.student(&id) else { continue };
            let class = student
                .class_id
                .as_deref()
                .and_then(|c| month.class_name(c))
                .unwrap_or_default();
            alerts.push(Alert {
                severity: Severity::Danger,
                title: "Frequent absences".to_string(),
                message: format!(
                    "{} ({}) missed {} sessions this month",
                    student.name,
                    class,
                    t.absent_count()
                ),
                subject_id: id,
                raised_at: now,
            });
        }

        let live = Ledger::load_in(
            &tx,
            &WindowFilter::default().with_statuses(&[SessionStatus::Active]),
        )?;
        for s in live.sessions() {
            let stats = live.session_tally(s).stats();
            if self.risk.is_low_turnout(&stats) {
                alerts.push(Alert {
                    severity: Severity::Warning,
                    title: "Low turnout".to_string(),
                    message: format!(
                        "{} in {} is at {}% attendance",
                        s.subject,
                        live.class_name(&s.class_id).unwrap_or_default(),
                        stats.attendance_rate
                    ),
                    subject_id: s.id.clone(),
                    raised_at: now,
                });
            }
        }

        let mut stmt = tx.prepare(
            "SELECT c.id, c.name, c.grade_level FROM classes c
             WHERE NOT EXISTS (SELECT 1 FROM sessions s WHERE s.class_id = c.id AND s.date = ?)
             ORDER BY c.name",
        )?;
        let idle = stmt
            .query_map([today], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        for (id, name, grade_level) in idle {
            alerts.push(Alert {
                severity: Severity::Info,
                title: "No session today".to_string(),
                message: format!("{} ({}) has no session scheduled today", name, grade_level),
                subject_id: id,
                raised_at: now,
            });
        }
        tx.commit()?;

        alerts.sort_by_key(|a| a.severity);
        let total_alerts = alerts.len();
        alerts.truncate(MAX_ALERTS);
        Ok(Alerts {
            alerts,
            total_alerts,
        })
    }

    /// Per-class, per-subject and top-student figures for the calendar week,
    /// month or year around today.
    pub fn stats(&self, period: Period) -> CoreResult<DashboardStats> {
        let (date_from, date_to) = period_bounds(period, self.clock.now().date());
        let tx = self.store.read_tx()?;
        let ledger =
            Ledger::load_in(&tx, &WindowFilter::between(date_from, date_to).with_statuses(&LIVE))?;
        tx.commit()?;

        let mut top_students = rollup_ledger(&ledger, GroupBy::Student);
        top_students.retain(|r| r.stats.present > 0);
        top_students.sort_by(|a, b| {
            b.stats
                .present
                .cmp(&a.stats.present)
                .then_with(|| {
                    b.stats
                        .avg_quiz
                        .unwrap_or(0.0)
                        .total_cmp(&a.stats.avg_quiz.unwrap_or(0.0))
                })
                .then_with(|| a.label.cmp(&b.label))
        });
        top_students.truncate(TOP_STUDENTS);

        let mut class_stats = rollup_ledger(&ledger, GroupBy::Class);
        class_stats.sort_by(|a, b| a.label.cmp(&b.label));
        let mut subject_stats = rollup_ledger(&ledger, GroupBy::Subject);
        subject_stats.sort_by(|a, b| b.sessions.cmp(&a.sessions).then_with(|| a.key.cmp(&b.key)));

        Ok(DashboardStats {
            period,
            date_from,
            date_to,
            class_stats,
            subject_stats,
            top_students,
        })
    }

    /// Latest check-ins and session starts, newest first.
    pub fn recent(&self, limit: usize) -> CoreResult<Vec<Activity>> {
        let limit = limit.clamp(1, MAX_RECENT);
        let tx = self.store.read_tx()?;
        let mut feed = Vec::new();

        let mut stmt = tx.prepare(
            "SELECT a.attendance_time, a.session_id, se.subject, c.name, a.student_id, st.name
             FROM attendance a
             JOIN sessions se ON se.id = a.session_id
             LEFT JOIN classes c ON c.id = se.class_id
             LEFT JOIN students st ON st.id = a.student_id
             ORDER BY a.attendance_time DESC, a.id
             LIMIT ?",
        )?;
        let rows = stmt
            .query_map([limit as i64], |r| {
                Ok(Activity {
                    kind: ActivityKind::Attendance,
                    at: r.get(0)?,
                    session_id: r.get(1)?,
                    subject: r.get(2)?,
                    class_name: r.get(3)?,
                    student_id: r.get(4)?,
                    student_name: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        feed.extend(rows);
        drop(stmt);

        let mut stmt = tx.prepare(
            "SELECT se.created_at, se.id, se.subject, c.name
             FROM sessions se
             LEFT JOIN classes c ON c.id = se.class_id
             ORDER BY se.created_at DESC, se.id
             LIMIT ?",
        )?;
        let rows = stmt
            .query_map([limit as i64], |r| {
                Ok(Activity {
                    kind: ActivityKind::Session,
                    at: r.get(0)?,
                    session_id: r.get(1)?,
                    subject: r.get(2)?,
                    class_name: r.get(3)?,
                    student_id: None,
                    student_name: None,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        feed.extend(rows);
        drop(stmt);
        tx.commit()?;

        // Stable sort keeps check-ins ahead of a session created at the same instant.
        feed.sort_by(|a, b| b.at.cmp(&a.at));
        feed.truncate(limit);
        Ok(feed)
    }

    pub fn chart(&self, kind: ChartKind, range: ChartRange) -> CoreResult<Chart> {
        let today = self.clock.now().date();
        let tx = self.store.read_tx()?;
        let chart = match kind {
            ChartKind::AttendanceTrend => {
                let days = in_range("days", range.days, 1, 366)?;
                let from = today - Duration::days(days - 1);
                let ledger =
                    Ledger::load_in(&tx, &WindowFilter::between(from, today).with_statuses(&LIVE))?;
                let rows = rollup_ledger(&ledger, GroupBy::Day);
                Chart {
                    kind,
                    chart_type: ChartType::Line,
                    labels: rows.iter().map(|r| r.label.clone()).collect(),
                    series: vec![
                        series("attendance", &rows, |r| r.stats.present as f64),
                        series("sessions", &rows, |r| r.sessions as f64),
                        series("attendanceRate", &rows, |r| r.stats.attendance_rate),
                    ],
                }
            }
            ChartKind::ClassDistribution => {
                let (from, to) = month_bounds(today);
                let ledger =
                    Ledger::load_in(&tx, &WindowFilter::between(from, to).with_statuses(&LIVE))?;
                let rates: HashMap<String, f64> = rollup_ledger(&ledger, GroupBy::Class)
                    .into_iter()
                    .map(|r| (r.key, r.stats.attendance_rate))
                    .collect();
                let mut stmt = tx.prepare(
                    "SELECT c.id, c.name, COUNT(s.id) AS n
                     FROM classes c
                     LEFT JOIN students s ON s.class_id = c.id AND s.active = 1
                     GROUP BY c.id
                     ORDER BY n DESC, c.name",
                )?;
                let classes = stmt
                    .query_map([], |r| {
                        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                drop(stmt);
                Chart {
                    kind,
                    chart_type: ChartType::Doughnut,
                    labels: classes.iter().map(|c| c.1.clone()).collect(),
                    series: vec![
                        Series {
                            label: "students",
                            data: classes.iter().map(|c| c.2 as f64).collect(),
                        },
                        Series {
                            label: "attendanceRate",
                            data: classes
                                .iter()
                                .map(|c| rates.get(&c.0).copied().unwrap_or(0.0))
                                .collect(),
                        },
                    ],
                }
            }
            ChartKind::PerformanceDistribution => {
                let (from, to) = month_bounds(today);
                let ledger = Ledger::load_in(&tx, &WindowFilter::between(from, to))?;
                let grades = grade_distribution(&performance_rows(&ledger, self.performance));
                Chart {
                    kind,
                    chart_type: ChartType::Pie,
                    labels: grades.iter().map(|g| g.grade.to_string()).collect(),
                    series: vec![Series {
                        label: "students",
                        data: grades.iter().map(|g| g.count as f64).collect(),
                    }],
                }
            }
            ChartKind::WeeklyComparison => {
                let weeks = in_range("weeks", range.weeks, 1, 52)?;
                let (monday, _) = week_bounds(today);
                let from = monday - Duration::weeks(weeks - 1);
                let ledger =
                    Ledger::load_in(&tx, &WindowFilter::between(from, today).with_statuses(&LIVE))?;
                let rows = rollup_ledger(&ledger, GroupBy::Week);
                Chart {
                    kind,
                    chart_type: ChartType::Bar,
                    labels: rows.iter().map(|r| r.label.clone()).collect(),
                    series: vec![
                        series("sessions", &rows, |r| r.sessions as f64),
                        series("attendance", &rows, |r| r.stats.present as f64),
                        series("attendanceRate", &rows, |r| r.stats.attendance_rate),
                    ],
                }
            }
        };
        tx.commit()?;
        Ok(chart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::fixtures::{check_in, seed};
    use crate::clock::FixedClock;

    fn clock() -> FixedClock {
        FixedClock::new(
            NaiveDate::from_ymd_opt(2026, 3, 5)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn month_and_week_bounds() {
        let d = NaiveDate::from_ymd_opt(2026, 12, 17).unwrap();
        assert_eq!(
            month_bounds(d),
            (
                NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 12, 31).unwrap()
            )
        );
        // 2026-03-05 is a Thursday.
        let (mon, sun) = week_bounds(NaiveDate::from_ymd_opt(2026, 3, 5).unwrap());
        assert_eq!(mon, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        assert_eq!(sun, NaiveDate::from_ymd_opt(2026, 3, 8).unwrap());
    }

    #[test]
    fn overview_counts_today_and_month() {
        let store = Store::open_in_memory().unwrap();
        seed(
            &store,
            &[
                ("x1", "c1", "2026-03-02", "08:00:00", SessionStatus::Completed),
                ("x2", "c1", "2026-03-05", "08:00:00", SessionStatus::Active),
                ("x3", "c2", "2026-03-03", "08:00:00", SessionStatus::Completed),
            ],
        );
        check_in(&store, "a1", "s1", "x1", "2026-03-02 08:00:00", Some(50));
        check_in(&store, "a2", "s1", "x2", "2026-03-05 08:10:00", None);
        check_in(&store, "a3", "s3", "x3", "2026-03-03 08:00:00", None);
        let clock = clock();
        let risk = RiskPolicy::default();
        let perf = PerformancePolicy::default();
        let o = Dashboard::new(&store, &clock, &risk, &perf).overview().unwrap();

        assert_eq!(o.basic.total_students, 3);
        assert_eq!(o.basic.active_sessions, 1);
        assert_eq!(o.basic.today_attendance, 1);
        assert_eq!(o.today.sessions, 1);
        assert_eq!(o.today.stats.attendance_rate, 50.0);
        assert_eq!(o.week.sessions, 3);
        assert_eq!(o.month.attendance, 3);
        assert_eq!(o.month.unique_students, 2);
        assert_eq!(o.top_classes[0].key, "c2");
        assert_eq!(o.top_classes[0].stats.attendance_rate, 100.0);
    }

    #[test]
    fn alerts_sorted_by_severity() {
        let store = Store::open_in_memory().unwrap();
        seed(
            &store,
            &[
                ("x1", "c1", "2026-03-02", "08:00:00", SessionStatus::Completed),
                ("x2", "c1", "2026-03-03", "08:00:00", SessionStatus::Completed),
                ("x3", "c1", "2026-03-04", "08:00:00", SessionStatus::Completed),
                ("x4", "c1", "2026-03-05", "08:00:00", SessionStatus::Active),
            ],
        );
        check_in(&store, "a1", "s1", "x1", "2026-03-02 08:00:00", None);
        let clock = clock();
        let risk = RiskPolicy::default();
        let perf = PerformancePolicy::default();
        let a = Dashboard::new(&store, &clock, &risk, &perf).alerts().unwrap();

        let kinds: Vec<_> = a.alerts.iter().map(|x| x.severity).collect();
        // Ben missed all three completed sessions, x4 has nobody yet, 2B has no session today.
        assert_eq!(kinds, vec![Severity::Danger, Severity::Warning, Severity::Info]);
        assert_eq!(a.alerts[0].subject_id, "s2");
        assert_eq!(a.alerts[1].subject_id, "x4");
        assert_eq!(a.alerts[2].subject_id, "c2");
        assert_eq!(a.total_alerts, 3);
    }

    #[test]
    fn stats_recent_and_charts() {
        use crate::error::ErrorKind;

        let store = Store::open_in_memory().unwrap();
        seed(
            &store,
            &[
                ("x1", "c1", "2026-03-02", "08:00:00", SessionStatus::Completed),
                ("x2", "c1", "2026-03-05", "08:00:00", SessionStatus::Active),
                ("x3", "c2", "2026-03-03", "08:00:00", SessionStatus::Completed),
            ],
        );
        check_in(&store, "a1", "s1", "x1", "2026-03-02 08:00:00", Some(50));
        check_in(&store, "a2", "s1", "x2", "2026-03-05 08:10:00", None);
        check_in(&store, "a3", "s3", "x3", "2026-03-03 08:00:00", None);
        let clock = clock();
        let risk = RiskPolicy::default();
        let perf = PerformancePolicy::default();
        let d = Dashboard::new(&store, &clock, &risk, &perf);

        let week = d.stats(Period::Week).unwrap();
        let top: Vec<_> = week.top_students.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(top, vec!["s1", "s3"]);
        let classes: Vec<_> = week.class_stats.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(classes, vec!["1A", "2B"]);
        assert_eq!(week.subject_stats[0].sessions, 3);
        let year = d.stats(Period::Year).unwrap();
        assert_eq!(year.date_from, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert_eq!(year.date_to, NaiveDate::from_ymd_opt(2026, 12, 31).unwrap());

        let feed = d.recent(2).unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].kind, ActivityKind::Attendance);
        assert_eq!(feed[0].student_name.as_deref(), Some("Ana"));
        assert_eq!(feed[1].at.to_string(), "2026-03-03 08:00:00");
        let feed = d.recent(10).unwrap();
        assert_eq!(feed.len(), 6);
        assert_eq!(feed[5].kind, ActivityKind::Session);

        let trend = d.chart(ChartKind::AttendanceTrend, ChartRange::default()).unwrap();
        assert_eq!(trend.chart_type, ChartType::Line);
        assert_eq!(trend.labels, vec!["2026-03-02", "2026-03-03", "2026-03-05"]);
        assert_eq!(trend.series[2].data, vec![50.0, 100.0, 50.0]);

        let dist = d.chart(ChartKind::ClassDistribution, ChartRange::default()).unwrap();
        assert_eq!(dist.labels, vec!["1A", "2B"]);
        assert_eq!(dist.series[0].data, vec![2.0, 1.0]);
        assert_eq!(dist.series[1].data, vec![50.0, 100.0]);

        let perf_chart = d.chart(ChartKind::PerformanceDistribution, ChartRange::default()).unwrap();
        assert_eq!(perf_chart.labels.len(), 8);
        assert_eq!(perf_chart.series[0].data.iter().sum::<f64>(), 2.0);

        let weekly = d.chart(ChartKind::WeeklyComparison, ChartRange::default()).unwrap();
        assert_eq!(weekly.labels, vec!["2026-W10"]);
        assert_eq!(weekly.series[0].data, vec![3.0]);

        let bad = ChartRange { days: 0, weeks: 4 };
        assert_eq!(
            d.chart(ChartKind::AttendanceTrend, bad).unwrap_err().kind(),
            ErrorKind::ValidationError
        );
    }
}
