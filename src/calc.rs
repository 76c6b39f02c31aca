//! Canonical attendance arithmetic. Every report, summary and alert derives its
//! numbers through these functions so the same definition of "late" or "rate"
//! holds everywhere.

use crate::model::{AttendanceRecord, HomeworkStatus, Rating, Session};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A check-in more than this many seconds after the session start is late.
pub const LATE_AFTER_SECS: i64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Punctuality {
    OnTime,
    Late,
}

impl Punctuality {
    /// Exactly `LATE_AFTER_SECS` after start still counts as on time.
    pub fn classify(session: &Session, attendance_time: NaiveDateTime) -> Punctuality {
        if seconds_after_start(session, attendance_time) > LATE_AFTER_SECS {
            Punctuality::Late
        } else {
            Punctuality::OnTime
        }
    }

    pub fn is_late(self) -> bool {
        self == Punctuality::Late
    }
}

pub fn seconds_after_start(session: &Session, attendance_time: NaiveDateTime) -> i64 {
    (attendance_time - session.starts_at()).num_seconds()
}

/// Whole minutes past the start, zero for early arrivals.
pub fn minutes_late(session: &Session, attendance_time: NaiveDateTime) -> i64 {
    (seconds_after_start(session, attendance_time) / 60).max(0)
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Percentage rounded to two decimals; 0 when there is nothing to divide by.
pub fn rate(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    round2(numerator as f64 / denominator as f64 * 100.0)
}

/// Running counters for one group (a session, a student, a class, a day...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally {
    pub possible: u64,
    pub present: u64,
    pub on_time: u64,
    pub late: u64,
    quiz_sum: i64,
    quiz_count: u64,
}

impl Tally {
    /// One roster slot without a record.
    pub fn absent(&mut self) {
        self.possible += 1;
    }

    /// One roster slot filled by `record`.
    pub fn present(&mut self, session: &Session, record: &AttendanceRecord) {
        self.possible += 1;
        self.present += 1;
        if Punctuality::classify(session, record.attendance_time).is_late() {
            self.late += 1;
        } else {
            self.on_time += 1;
        }
        if let Some(q) = record.quiz_score {
            self.quiz_sum += q;
            self.quiz_count += 1;
        }
    }

    pub fn merge(&mut self, other: &Tally) {
        self.possible += other.possible;
        self.present += other.present;
        self.on_time += other.on_time;
        self.late += other.late;
        self.quiz_sum += other.quiz_sum;
        self.quiz_count += other.quiz_count;
    }

    pub fn absent_count(&self) -> u64 {
        self.possible - self.present
    }

    pub fn stats(&self) -> AttendanceStats {
        AttendanceStats {
            possible: self.possible,
            present: self.present,
            absent: self.absent_count(),
            on_time: self.on_time,
            late: self.late,
            attendance_rate: rate(self.present, self.possible),
            punctuality_rate: rate(self.on_time, self.present),
            avg_quiz: avg_quiz(self.quiz_sum, self.quiz_count),
            quiz_submissions: self.quiz_count,
        }
    }
}

fn avg_quiz(sum: i64, count: u64) -> Option<f64> {
    (count > 0).then(|| round2(sum as f64 / count as f64))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub possible: u64,
    pub present: u64,
    pub absent: u64,
    pub on_time: u64,
    pub late: u64,
    pub attendance_rate: f64,
    pub punctuality_rate: f64,
    pub avg_quiz: Option<f64>,
    pub quiz_submissions: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RiskPolicy {
    pub high_risk_below: f64,
    pub low_turnout_below: f64,
    pub frequent_absence_min: u64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            high_risk_below: 70.0,
            low_turnout_below: 50.0,
            frequent_absence_min: 3,
        }
    }
}

impl RiskPolicy {
    /// Needs at least one possible session; a student with none is not at risk.
    pub fn is_high_risk(&self, stats: &AttendanceStats) -> bool {
        stats.possible > 0 && stats.attendance_rate < self.high_risk_below
    }

    pub fn is_low_turnout(&self, stats: &AttendanceStats) -> bool {
        stats.attendance_rate < self.low_turnout_below
    }

    pub fn is_frequent_absentee(&self, absences: u64) -> bool {
        absences >= self.frequent_absence_min
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PerformancePolicy {
    pub points_per_session: f64,
    pub attendance_cap: f64,
    pub quiz_weight: f64,
    pub quiz_cap: f64,
    pub excellent_points: f64,
    pub very_good_points: f64,
    pub good_points: f64,
    pub acceptable_points: f64,
    pub points_per_homework: f64,
    pub homework_cap: f64,
    pub max_score: f64,
}

impl Default for PerformancePolicy {
    fn default() -> Self {
        Self {
            points_per_session: 2.0,
            attendance_cap: 30.0,
            quiz_weight: 0.4,
            quiz_cap: 40.0,
            excellent_points: 5.0,
            very_good_points: 4.0,
            good_points: 3.0,
            acceptable_points: 2.0,
            points_per_homework: 2.0,
            homework_cap: 10.0,
            max_score: 100.0,
        }
    }
}

/// Per-student inputs to the performance score.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceInput {
    pub attended_sessions: u64,
    pub avg_quiz: Option<f64>,
    pub excellent: u64,
    pub very_good: u64,
    pub good: u64,
    pub acceptable: u64,
    pub poor: u64,
    pub homework_completed: u64,
    pub homework_incomplete: u64,
    pub homework_not_submitted: u64,
}

impl PerformanceInput {
    pub fn add(&mut self, record: &AttendanceRecord) {
        self.attended_sessions += 1;
        match record.teacher_rating {
            Some(Rating::Excellent) => self.excellent += 1,
            Some(Rating::VeryGood) => self.very_good += 1,
            Some(Rating::Good) => self.good += 1,
            Some(Rating::Acceptable) => self.acceptable += 1,
            Some(Rating::Poor) => self.poor += 1,
            None => {}
        }
        match record.homework_status {
            Some(HomeworkStatus::Completed) => self.homework_completed += 1,
            Some(HomeworkStatus::Incomplete) => self.homework_incomplete += 1,
            Some(HomeworkStatus::NotSubmitted) => self.homework_not_submitted += 1,
            None => {}
        }
    }
}

impl PerformancePolicy {
    pub fn score(&self, input: &PerformanceInput) -> f64 {
        let attendance =
            (input.attended_sessions as f64 * self.points_per_session).min(self.attendance_cap);
        let quiz = (input.avg_quiz.unwrap_or(0.0) * self.quiz_weight).min(self.quiz_cap);
        let ratings = input.excellent as f64 * self.excellent_points
            + input.very_good as f64 * self.very_good_points
            + input.good as f64 * self.good_points
            + input.acceptable as f64 * self.acceptable_points;
        let homework =
            (input.homework_completed as f64 * self.points_per_homework).min(self.homework_cap);
        round2((attendance + quiz + ratings + homework).min(self.max_score))
    }
}

pub const GRADES: [&str; 8] = ["A+", "A", "B+", "B", "C+", "C", "D", "F"];

pub fn grade(score: f64) -> &'static str {
    match score {
        s if s >= 95.0 => "A+",
        s if s >= 90.0 => "A",
        s if s >= 85.0 => "B+",
        s if s >= 80.0 => "B",
        s if s >= 75.0 => "C+",
        s if s >= 70.0 => "C",
        s if s >= 60.0 => "D",
        _ => "F",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionStatus;
    use chrono::{NaiveDate, NaiveTime};

    fn session() -> Session {
        let d = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let t = d.and_hms_opt(7, 0, 0).unwrap();
        Session {
            id: "x1".to_string(),
            class_id: "c1".to_string(),
            subject: "Math".to_string(),
            description: None,
            date: d,
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: None,
            status: SessionStatus::Active,
            quiz_total_score: 10,
            created_at: t,
            updated_at: t,
        }
    }

    fn record(at: NaiveDateTime, quiz: Option<i64>) -> AttendanceRecord {
        AttendanceRecord {
            id: "a".to_string(),
            student_id: "s".to_string(),
            session_id: "x1".to_string(),
            attendance_time: at,
            teacher_rating: None,
            quiz_score: quiz,
            participation_rating: None,
            behavior_rating: None,
            homework_status: None,
            notes: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn nine_hundred_seconds_is_on_time() {
        let s = session();
        let start = s.starts_at();
        assert_eq!(
            Punctuality::classify(&s, start + chrono::Duration::seconds(900)),
            Punctuality::OnTime
        );
        assert_eq!(
            Punctuality::classify(&s, start + chrono::Duration::seconds(901)),
            Punctuality::Late
        );
        assert_eq!(
            Punctuality::classify(&s, start - chrono::Duration::minutes(5)),
            Punctuality::OnTime
        );
        assert_eq!(minutes_late(&s, start - chrono::Duration::minutes(5)), 0);
        assert_eq!(minutes_late(&s, start + chrono::Duration::seconds(1210)), 20);
    }

    #[test]
    fn rate_of_empty_denominator_is_zero() {
        assert_eq!(rate(0, 0), 0.0);
        assert_eq!(rate(2, 3), 66.67);
        assert_eq!(rate(1, 1), 100.0);
    }

    #[test]
    fn tally_splits_on_time_and_late() {
        let s = session();
        let start = s.starts_at();
        let mut t = Tally::default();
        t.present(&s, &record(start + chrono::Duration::minutes(2), Some(8)));
        t.present(&s, &record(start + chrono::Duration::minutes(20), None));
        t.absent();
        let stats = t.stats();
        assert_eq!(stats.possible, 3);
        assert_eq!(stats.present, 2);
        assert_eq!(stats.absent, 1);
        assert_eq!(stats.attendance_rate, 66.67);
        assert_eq!(stats.punctuality_rate, 50.0);
        assert_eq!(stats.avg_quiz, Some(8.0));
        assert_eq!(Tally::default().stats().avg_quiz, None);
    }

    #[test]
    fn high_risk_needs_a_possible_session() {
        let policy = RiskPolicy::default();
        assert!(!policy.is_high_risk(&Tally::default().stats()));
        let mut t = Tally::default();
        t.absent();
        assert!(policy.is_high_risk(&t.stats()));
        assert!(policy.is_frequent_absentee(3));
        assert!(!policy.is_frequent_absentee(2));
    }

    #[test]
    fn performance_score_caps_each_part() {
        let policy = PerformancePolicy::default();
        let input = PerformanceInput {
            attended_sessions: 20,
            avg_quiz: Some(90.0),
            excellent: 2,
            good: 1,
            homework_completed: 7,
            ..Default::default()
        };
        // 30 + 36 + 13 + 10
        assert_eq!(policy.score(&input), 89.0);
        assert_eq!(grade(89.0), "B+");

        let maxed = PerformanceInput {
            attended_sessions: 40,
            avg_quiz: Some(100.0),
            excellent: 10,
            homework_completed: 10,
            ..Default::default()
        };
        assert_eq!(policy.score(&maxed), 100.0);
        assert_eq!(grade(100.0), "A+");
        assert_eq!(grade(59.99), "F");
    }
}
