use crate::error::CoreResult;
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::Store;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn store<'a>(state: &'a AppState, req: &Request) -> Result<&'a Store, serde_json::Value> {
    state
        .store
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Decodes `params` (or one member of it). Missing params read as `{}`.
pub fn params<T: DeserializeOwned>(req: &Request, key: Option<&str>) -> Result<T, serde_json::Value> {
    let raw = match key {
        Some(k) => req.params.get(k).cloned(),
        None => Some(req.params.clone()),
    };
    let raw = match raw {
        Some(v) if !v.is_null() => v,
        _ => serde_json::json!({}),
    };
    serde_json::from_value(raw).map_err(|e| {
        let mut message = e.to_string();
        if let Some(k) = key {
            message = format!("{}: {}", k, message);
        }
        err(&req.id, "bad_params", message, None)
    })
}

pub fn reply<T: Serialize>(req: &Request, result: CoreResult<T>) -> serde_json::Value {
    match result {
        Ok(v) => match serde_json::to_value(v) {
            Ok(json) => ok(&req.id, json),
            Err(e) => err(&req.id, "internal", e.to_string(), None),
        },
        Err(e) => core_err(&req.id, &e),
    }
}
