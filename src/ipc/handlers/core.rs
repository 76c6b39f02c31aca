use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{params, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::Store;
use chrono::{Duration, NaiveDateTime};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

type Reply = Result<serde_json::Value, serde_json::Value>;

fn handle_health(state: &mut AppState, req: &Request) -> Reply {
    Ok(ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "databasePath": state
                .store
                .as_ref()
                .and_then(|s| s.path())
                .map(|p| p.to_string_lossy().to_string()),
            "notifier": state.config.notifier.kind,
            "contactsEncrypted": state.config.codec.key.is_some(),
            "now": state.clock.now(),
        }),
    ))
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> Reply {
    let path = PathBuf::from(required_str(req, "path")?);
    match Store::open_workspace(&path, state.config.busy_timeout()) {
        Ok(store) => {
            info!(workspace = %path.display(), "workspace opened");
            let db = store.path().map(|p| p.to_string_lossy().to_string());
            state.workspace = Some(path.clone());
            state.store = Some(store);
            Ok(ok(
                &req.id,
                json!({ "workspacePath": path.to_string_lossy(), "databasePath": db }),
            ))
        }
        Err(e) => Err(err(&req.id, "db_open_failed", format!("{e:#}"), None)),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClockParams {
    now: Option<NaiveDateTime>,
    advance_secs: Option<i64>,
}

/// Moves the replay clock. Refused on the wall clock.
fn handle_clock_set(state: &mut AppState, req: &Request) -> Reply {
    let Some(clock) = state.fixed_clock.as_ref() else {
        return Err(err(&req.id, "invalid_state", "daemon is running on the system clock", None));
    };
    let p: ClockParams = params(req, None)?;
    if let Some(now) = p.now {
        clock.set(now);
    }
    if let Some(secs) = p.advance_secs {
        clock.advance(Duration::seconds(secs));
    }
    Ok(ok(&req.id, json!({ "now": state.clock.now() })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "health" => handle_health(state, req),
        "workspace.select" => handle_workspace_select(state, req),
        "clock.set" => handle_clock_set(state, req),
        _ => return None,
    };
    Some(r.unwrap_or_else(|e| e))
}
