use crate::analytics::{self, WindowFilter};
use crate::directory::{CreateClass, Directory, UpdateClass};
use crate::ipc::helpers::{params, reply, required_str, store};
use crate::ipc::types::{AppState, Request};

type Reply = Result<serde_json::Value, serde_json::Value>;

fn directory<'a>(state: &'a AppState, req: &Request) -> Result<Directory<'a>, serde_json::Value> {
    Ok(Directory::new(
        store(state, req)?,
        state.clock.as_ref(),
        state.codec.as_ref(),
    ))
}

fn handle_classes_list(state: &AppState, req: &Request) -> Reply {
    let classes = directory(state, req)?.list_classes();
    Ok(reply(req, classes.map(|rows| serde_json::json!({ "classes": rows }))))
}

fn handle_classes_get(state: &AppState, req: &Request) -> Reply {
    let class_id = required_str(req, "classId")?;
    Ok(reply(req, directory(state, req)?.get_class(&class_id)))
}

fn handle_classes_create(state: &AppState, req: &Request) -> Reply {
    let p: CreateClass = params(req, None)?;
    Ok(reply(req, directory(state, req)?.create_class(&p)))
}

fn handle_classes_update(state: &AppState, req: &Request) -> Reply {
    let class_id = required_str(req, "classId")?;
    let patch: UpdateClass = params(req, Some("patch"))?;
    Ok(reply(req, directory(state, req)?.update_class(&class_id, &patch)))
}

fn handle_classes_delete(state: &AppState, req: &Request) -> Reply {
    let class_id = required_str(req, "classId")?;
    let done = directory(state, req)?.delete_class(&class_id);
    Ok(reply(req, done.map(|()| serde_json::json!({ "ok": true }))))
}

fn handle_classes_summary(state: &AppState, req: &Request) -> Reply {
    let class_id = required_str(req, "classId")?;
    let window: WindowFilter = params(req, Some("window"))?;
    let store = store(state, req)?;
    Ok(reply(
        req,
        analytics::class_summary(store, &class_id, &window, &state.risk),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "classes.list" => handle_classes_list(state, req),
        "classes.get" => handle_classes_get(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.update" => handle_classes_update(state, req),
        "classes.delete" => handle_classes_delete(state, req),
        "classes.summary" => handle_classes_summary(state, req),
        _ => return None,
    };
    Some(r.unwrap_or_else(|e| e))
}
