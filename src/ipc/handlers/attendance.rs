use crate::checkin::{CheckIn, MarkAttendance, QuickRegister};
use crate::ipc::helpers::{params, reply, required_str, store};
use crate::ipc::types::{AppState, Request};
use crate::model::Evaluation;
use serde_json::json;

type Reply = Result<serde_json::Value, serde_json::Value>;

fn checkin<'a>(state: &'a AppState, req: &Request) -> Result<CheckIn<'a>, serde_json::Value> {
    Ok(CheckIn::new(
        store(state, req)?,
        state.clock.as_ref(),
        state.codec.as_ref(),
    ))
}

fn handle_attendance_scan(state: &AppState, req: &Request) -> Reply {
    let barcode = required_str(req, "barcode")?;
    let session_id = required_str(req, "sessionId")?;
    Ok(reply(req, checkin(state, req)?.scan(&barcode, &session_id)))
}

fn handle_attendance_quick_register(state: &AppState, req: &Request) -> Reply {
    let p: QuickRegister = params(req, None)?;
    Ok(reply(req, checkin(state, req)?.quick_register_and_mark(&p)))
}

fn handle_attendance_mark(state: &AppState, req: &Request) -> Reply {
    let p: MarkAttendance = params(req, None)?;
    Ok(reply(req, checkin(state, req)?.mark_attendance(&p)))
}

fn handle_attendance_update(state: &AppState, req: &Request) -> Reply {
    let record_id = required_str(req, "recordId")?;
    let patch: Evaluation = params(req, Some("patch"))?;
    Ok(reply(req, checkin(state, req)?.update_attendance(&record_id, &patch)))
}

fn handle_attendance_delete(state: &AppState, req: &Request) -> Reply {
    let record_id = required_str(req, "recordId")?;
    let done = checkin(state, req)?.delete_attendance(&record_id);
    Ok(reply(req, done.map(|()| json!({ "ok": true }))))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "attendance.scan" => handle_attendance_scan(state, req),
        "attendance.quickRegister" => handle_attendance_quick_register(state, req),
        "attendance.mark" => handle_attendance_mark(state, req),
        "attendance.update" => handle_attendance_update(state, req),
        "attendance.delete" => handle_attendance_delete(state, req),
        _ => return None,
    };
    Some(r.unwrap_or_else(|e| e))
}
