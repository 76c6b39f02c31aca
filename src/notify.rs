//! Parent notifications after a session ends.
//!
//! The core only prepares messages; delivery goes through a [`Notifier`]
//! chosen by configuration.

use crate::error::{CoreError, CoreResult};
use crate::lifecycle::EndSessionOutcome;
use crate::model::HomeworkStatus;
use chrono::NaiveDate;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Present,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub student_id: String,
    pub student_name: String,
    pub phone: String,
    pub presence: Presence,
    pub message: String,
}

/// Shared header of one batch of messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub session_id: String,
    pub subject: String,
    pub class_name: Option<String>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotice {
    pub payload: NotificationPayload,
    pub recipients: Vec<Recipient>,
    /// Students left out because no parent phone is on file.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailure {
    pub student_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: Vec<DeliveryFailure>,
}

pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        recipients: &[Recipient],
        payload: &NotificationPayload,
    ) -> CoreResult<DeliveryReport>;
}

fn homework_label(h: HomeworkStatus) -> &'static str {
    match h {
        HomeworkStatus::Completed => "completed",
        HomeworkStatus::Incomplete => "incomplete",
        HomeworkStatus::NotSubmitted => "not submitted",
    }
}

/// One message per student with a parent phone on file.
pub fn session_report(outcome: &EndSessionOutcome) -> SessionNotice {
    let s = &outcome.session;
    let class = outcome
        .class_name
        .as_deref()
        .map(|c| format!(" ({})", c))
        .unwrap_or_default();
    let mut recipients = Vec::new();
    let mut skipped = Vec::new();

    for p in &outcome.present {
        let Some(phone) = p.contact.parent_phone.clone() else {
            skipped.push(p.student.id.clone());
            continue;
        };
        let r = &p.record;
        let mut lines = vec![format!(
            "{} attended {}{} on {} at {}.",
            p.student.name,
            s.subject,
            class,
            s.date,
            r.attendance_time.format("%H:%M")
        )];
        if p.punctuality.is_late() {
            lines.push(format!("Arrived {} minutes late.", p.minutes_late));
        }
        if let Some(rating) = r.teacher_rating {
            lines.push(format!("Teacher rating: {}", rating.as_str().replace('_', " ")));
        }
        if let Some(q) = r.quiz_score {
            lines.push(format!("Quiz: {}/{}", q, s.quiz_total_score));
        }
        if let Some(h) = r.homework_status {
            lines.push(format!("Homework: {}", homework_label(h)));
        }
        if let Some(n) = r.notes.as_deref().filter(|n| !n.is_empty()) {
            lines.push(format!("Notes: {}", n));
        }
        recipients.push(Recipient {
            student_id: p.student.id.clone(),
            student_name: p.student.name.clone(),
            phone,
            presence: Presence::Present,
            message: lines.join("\n"),
        });
    }

    for a in &outcome.absent {
        let Some(phone) = a.contact.parent_phone.clone() else {
            skipped.push(a.student.id.clone());
            continue;
        };
        recipients.push(Recipient {
            student_id: a.student.id.clone(),
            student_name: a.student.name.clone(),
            phone,
            presence: Presence::Absent,
            message: format!(
                "{} was absent from {}{} on {}.",
                a.student.name, s.subject, class, s.date
            ),
        });
    }

    SessionNotice {
        payload: NotificationPayload {
            session_id: s.id.clone(),
            subject: s.subject.clone(),
            class_name: outcome.class_name.clone(),
            date: s.date,
        },
        recipients,
        skipped,
    }
}

/// Keeps the last three digits; contact numbers are sealed at rest and stay
/// out of the logs.
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    let keep = digits.len().min(3);
    let tail: String = digits[digits.len() - keep..].iter().collect();
    format!("***{}", tail)
}

/// Dry run: writes each message to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        recipients: &[Recipient],
        payload: &NotificationPayload,
    ) -> CoreResult<DeliveryReport> {
        for r in recipients {
            info!(
                session_id = %payload.session_id,
                student_id = %r.student_id,
                to = %mask_phone(&r.phone),
                presence = ?r.presence,
                "notification (dry run)"
            );
        }
        Ok(DeliveryReport {
            sent: recipients.len(),
            failed: Vec::new(),
        })
    }
}

/// Posts `{to, message}` to `{base_url}/api/send` for every recipient.
pub struct WhatsAppNotifier {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl WhatsAppNotifier {
    pub fn new(base_url: &str, timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/send", base_url.trim_end_matches('/')),
        })
    }

    fn send_one(&self, r: &Recipient) -> Result<(), String> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "to": r.phone, "message": r.message }))
            .send()
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status().as_u16()));
        }
        Ok(())
    }
}

impl Notifier for WhatsAppNotifier {
    fn notify(
        &self,
        recipients: &[Recipient],
        payload: &NotificationPayload,
    ) -> CoreResult<DeliveryReport> {
        let mut report = DeliveryReport::default();
        for r in recipients {
            match self.send_one(r) {
                Ok(()) => report.sent += 1,
                Err(reason) => {
                    warn!(
                        session_id = %payload.session_id,
                        student_id = %r.student_id,
                        error = %reason,
                        "notification failed"
                    );
                    report.failed.push(DeliveryFailure {
                        student_id: r.student_id.clone(),
                        reason,
                    });
                }
            }
        }
        info!(
            session_id = %payload.session_id,
            sent = report.sent,
            failed = report.failed.len(),
            "notifications delivered"
        );
        Ok(report)
    }
}
