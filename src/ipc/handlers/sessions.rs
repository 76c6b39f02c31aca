use crate::analytics::{self, GroupBy, WindowFilter};
use crate::ipc::error::{core_err, ok};
use crate::ipc::helpers::{params, reply, required_str, store};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::{CreateSession, SessionLifecycle, UpdateSession};
use crate::notify;
use crate::store::sessions::SessionQuery;
use serde_json::json;
use tracing::warn;

type Reply = Result<serde_json::Value, serde_json::Value>;

fn lifecycle<'a>(state: &'a AppState, req: &Request) -> Result<SessionLifecycle<'a>, serde_json::Value> {
    Ok(SessionLifecycle::new(
        store(state, req)?,
        state.clock.as_ref(),
        state.codec.as_ref(),
    ))
}

fn handle_sessions_list(state: &AppState, req: &Request) -> Reply {
    let q: SessionQuery = params(req, None)?;
    let rows = lifecycle(state, req)?.list_sessions(&q);
    Ok(reply(req, rows.map(|rows| json!({ "sessions": rows }))))
}

fn handle_sessions_active(state: &AppState, req: &Request) -> Reply {
    let rows = lifecycle(state, req)?.active_sessions();
    Ok(reply(req, rows.map(|rows| json!({ "sessions": rows }))))
}

fn handle_sessions_get(state: &AppState, req: &Request) -> Reply {
    let session_id = required_str(req, "sessionId")?;
    Ok(reply(req, lifecycle(state, req)?.get_session(&session_id)))
}

fn handle_sessions_create(state: &AppState, req: &Request) -> Reply {
    let p: CreateSession = params(req, None)?;
    Ok(reply(req, lifecycle(state, req)?.create_session(&p)))
}

fn handle_sessions_update(state: &AppState, req: &Request) -> Reply {
    let session_id = required_str(req, "sessionId")?;
    let patch: UpdateSession = params(req, Some("patch"))?;
    Ok(reply(req, lifecycle(state, req)?.update_session(&session_id, &patch)))
}

/// Ends the session, then hands the per-parent messages to the notifier
/// unless `notify` is false. A delivery failure does not undo the end.
fn handle_sessions_end(state: &AppState, req: &Request) -> Reply {
    let session_id = required_str(req, "sessionId")?;
    let send = req
        .params
        .get("notify")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let outcome = match lifecycle(state, req)?.end_session(&session_id) {
        Ok(o) => o,
        Err(e) => return Err(core_err(&req.id, &e)),
    };
    let notice = notify::session_report(&outcome);
    let mut delivery = serde_json::Value::Null;
    if send {
        match state.notifier.notify(&notice.recipients, &notice.payload) {
            Ok(report) => delivery = json!(report),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "notification dispatch failed");
                delivery = json!({ "error": e.to_string() });
            }
        }
    }
    Ok(ok(
        &req.id,
        json!({
            "outcome": outcome,
            "notice": notice,
            "delivery": delivery,
        }),
    ))
}

fn handle_sessions_cancel(state: &AppState, req: &Request) -> Reply {
    let session_id = required_str(req, "sessionId")?;
    Ok(reply(req, lifecycle(state, req)?.cancel_session(&session_id)))
}

fn handle_sessions_delete(state: &AppState, req: &Request) -> Reply {
    let session_id = required_str(req, "sessionId")?;
    let done = lifecycle(state, req)?.delete_session(&session_id);
    Ok(reply(req, done.map(|()| json!({ "ok": true }))))
}

fn handle_sessions_stats(state: &AppState, req: &Request) -> Reply {
    let session_id = required_str(req, "sessionId")?;
    Ok(reply(req, analytics::session_stats(store(state, req)?, &session_id)))
}

fn handle_sessions_roster(state: &AppState, req: &Request) -> Reply {
    let session_id = required_str(req, "sessionId")?;
    Ok(reply(req, analytics::session_roster(store(state, req)?, &session_id)))
}

fn handle_sessions_rollup(state: &AppState, req: &Request) -> Reply {
    let window: WindowFilter = params(req, Some("window"))?;
    let group_by: GroupBy = params(req, Some("groupBy"))?;
    let rows = analytics::rollup(store(state, req)?, &window, group_by);
    Ok(reply(req, rows.map(|rows| json!({ "rows": rows }))))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "sessions.list" => handle_sessions_list(state, req),
        "sessions.active" => handle_sessions_active(state, req),
        "sessions.get" => handle_sessions_get(state, req),
        "sessions.create" => handle_sessions_create(state, req),
        "sessions.update" => handle_sessions_update(state, req),
        "sessions.end" => handle_sessions_end(state, req),
        "sessions.cancel" => handle_sessions_cancel(state, req),
        "sessions.delete" => handle_sessions_delete(state, req),
        "sessions.stats" => handle_sessions_stats(state, req),
        "sessions.roster" => handle_sessions_roster(state, req),
        "sessions.rollup" => handle_sessions_rollup(state, req),
        _ => return None,
    };
    Some(r.unwrap_or_else(|e| e))
}
