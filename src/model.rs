//! Persisted entities and their closed value sets.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub grade_level: String,
    pub capacity: i64,
    pub teacher_name: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Contact ciphertext exactly as persisted. Never serialized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SealedContact {
    pub parent_phone: Option<String>,
    pub emergency_phone: Option<String>,
}

/// Decrypted contact fields, produced by the codec on the way out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub parent_phone: Option<String>,
    pub emergency_phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub barcode: String,
    pub name: String,
    pub class_id: Option<String>,
    pub parent_email: Option<String>,
    pub active: bool,
    #[serde(skip)]
    pub sealed: SealedContact,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Compact student shape attached to check-in receipts and roster rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: String,
    pub name: String,
    pub barcode: String,
    pub class_id: Option<String>,
}

impl From<&Student> for StudentSummary {
    fn from(s: &Student) -> Self {
        StudentSummary {
            id: s.id.clone(),
            name: s.name.clone(),
            barcode: s.barcode.clone(),
            class_id: s.class_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 4] = [
        SessionStatus::Scheduled,
        SessionStatus::Active,
        SessionStatus::Completed,
        SessionStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub class_id: String,
    pub subject: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub status: SessionStatus,
    pub quiz_total_score: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Session {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }
}

/// Five-step teacher scale used for teacher, participation and behavior ratings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Excellent,
    VeryGood,
    Good,
    Acceptable,
    Poor,
}

impl Rating {
    pub const ALL: [Rating; 5] = [
        Rating::Excellent,
        Rating::VeryGood,
        Rating::Good,
        Rating::Acceptable,
        Rating::Poor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Rating::Excellent => "excellent",
            Rating::VeryGood => "very_good",
            Rating::Good => "good",
            Rating::Acceptable => "acceptable",
            Rating::Poor => "poor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeworkStatus {
    Completed,
    Incomplete,
    NotSubmitted,
}

impl HomeworkStatus {
    pub const ALL: [HomeworkStatus; 3] = [
        HomeworkStatus::Completed,
        HomeworkStatus::Incomplete,
        HomeworkStatus::NotSubmitted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HomeworkStatus::Completed => "completed",
            HomeworkStatus::Incomplete => "incomplete",
            HomeworkStatus::NotSubmitted => "not_submitted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub session_id: String,
    pub attendance_time: NaiveDateTime,
    pub teacher_rating: Option<Rating>,
    pub quiz_score: Option<i64>,
    pub participation_rating: Option<Rating>,
    pub behavior_rating: Option<Rating>,
    pub homework_status: Option<HomeworkStatus>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Optional evaluation fields a teacher may attach to a record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub teacher_rating: Option<Rating>,
    pub quiz_score: Option<i64>,
    pub participation_rating: Option<Rating>,
    pub behavior_rating: Option<Rating>,
    pub homework_status: Option<HomeworkStatus>,
    pub notes: Option<String>,
}

impl Evaluation {
    pub fn is_empty(&self) -> bool {
        self.teacher_rating.is_none()
            && self.quiz_score.is_none()
            && self.participation_rating.is_none()
            && self.behavior_rating.is_none()
            && self.homework_status.is_none()
            && self.notes.is_none()
    }
}

macro_rules! text_enum_sql {
    ($t:ty) => {
        impl ToSql for $t {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $t {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                <$t>::parse(s).ok_or(FromSqlError::InvalidType)
            }
        }
    };
}

text_enum_sql!(SessionStatus);
text_enum_sql!(Rating);
text_enum_sql!(HomeworkStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_matches_stored_values() {
        for s in SessionStatus::ALL {
            assert_eq!(SessionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(SessionStatus::parse("paused"), None);
        assert!(SessionStatus::Completed.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
    }

    #[test]
    fn rating_serde_uses_snake_case() {
        let r: Rating = serde_json::from_str("\"very_good\"").unwrap();
        assert_eq!(r, Rating::VeryGood);
        assert_eq!(serde_json::to_string(&HomeworkStatus::NotSubmitted).unwrap(), "\"not_submitted\"");
    }

    #[test]
    fn evaluation_is_empty_by_default() {
        assert!(Evaluation::default().is_empty());
        let e = Evaluation {
            quiz_score: Some(7),
            ..Default::default()
        };
        assert!(!e.is_empty());
    }
}
