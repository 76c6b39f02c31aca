use crate::ipc::error::err;
use crate::ipc::helpers::{params, reply, required_str, store};
use crate::ipc::types::{AppState, Request};
use crate::reports::{ReportParams, Reports};

type Reply = Result<serde_json::Value, serde_json::Value>;

const DEFAULT_MIN_ABSENCES: u64 = 1;

fn reports<'a>(state: &'a AppState, req: &Request) -> Result<Reports<'a>, serde_json::Value> {
    Ok(Reports::new(
        store(state, req)?,
        state.clock.as_ref(),
        state.codec.as_ref(),
        &state.risk,
        &state.performance,
    ))
}

fn handle_reports_attendance(state: &AppState, req: &Request) -> Reply {
    let p: ReportParams = params(req, None)?;
    Ok(reply(req, reports(state, req)?.attendance_report(&p)))
}

fn handle_reports_student(state: &AppState, req: &Request) -> Reply {
    let student_id = required_str(req, "studentId")?;
    let p: ReportParams = params(req, None)?;
    Ok(reply(req, reports(state, req)?.student_report(&student_id, &p)))
}

fn handle_reports_class(state: &AppState, req: &Request) -> Reply {
    let class_id = required_str(req, "classId")?;
    let p: ReportParams = params(req, None)?;
    Ok(reply(req, reports(state, req)?.class_report(&class_id, &p)))
}

fn handle_reports_session(state: &AppState, req: &Request) -> Reply {
    let session_id = required_str(req, "sessionId")?;
    Ok(reply(req, reports(state, req)?.session_report(&session_id)))
}

fn handle_reports_absence(state: &AppState, req: &Request) -> Reply {
    let p: ReportParams = params(req, None)?;
    let min_absences = match req.params.get("minAbsences") {
        None | Some(serde_json::Value::Null) => DEFAULT_MIN_ABSENCES,
        Some(v) => v
            .as_u64()
            .ok_or_else(|| err(&req.id, "bad_params", "minAbsences must be a non-negative integer", None))?,
    };
    Ok(reply(req, reports(state, req)?.absence_report(&p, min_absences)))
}

fn handle_reports_performance(state: &AppState, req: &Request) -> Reply {
    let p: ReportParams = params(req, None)?;
    Ok(reply(req, reports(state, req)?.performance_report(&p)))
}

fn handle_reports_summary(state: &AppState, req: &Request) -> Reply {
    let p: ReportParams = params(req, None)?;
    Ok(reply(req, reports(state, req)?.summary_report(&p)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "reports.attendance" => handle_reports_attendance(state, req),
        "reports.student" => handle_reports_student(state, req),
        "reports.class" => handle_reports_class(state, req),
        "reports.session" => handle_reports_session(state, req),
        "reports.absence" => handle_reports_absence(state, req),
        "reports.performance" => handle_reports_performance(state, req),
        "reports.summary" => handle_reports_summary(state, req),
        _ => return None,
    };
    Some(r.unwrap_or_else(|e| e))
}
