use crate::analytics::{self, WindowFilter};
use crate::directory::{CreateStudent, Directory, UpdateStudent};
use crate::ipc::helpers::{params, reply, required_str, store};
use crate::ipc::types::{AppState, Request};
use crate::store::students::StudentQuery;

type Reply = Result<serde_json::Value, serde_json::Value>;

fn directory<'a>(state: &'a AppState, req: &Request) -> Result<Directory<'a>, serde_json::Value> {
    Ok(Directory::new(
        store(state, req)?,
        state.clock.as_ref(),
        state.codec.as_ref(),
    ))
}

fn handle_students_list(state: &AppState, req: &Request) -> Reply {
    let q: StudentQuery = params(req, None)?;
    let rows = directory(state, req)?.list_students(&q);
    Ok(reply(req, rows.map(|rows| serde_json::json!({ "students": rows }))))
}

fn handle_students_get(state: &AppState, req: &Request) -> Reply {
    let student_id = required_str(req, "studentId")?;
    Ok(reply(req, directory(state, req)?.get_student(&student_id)))
}

fn handle_students_find(state: &AppState, req: &Request) -> Reply {
    let barcode = required_str(req, "barcode")?;
    Ok(reply(req, directory(state, req)?.find_student(&barcode)))
}

fn handle_students_create(state: &AppState, req: &Request) -> Reply {
    let p: CreateStudent = params(req, None)?;
    Ok(reply(req, directory(state, req)?.create_student(&p)))
}

fn handle_students_update(state: &AppState, req: &Request) -> Reply {
    let student_id = required_str(req, "studentId")?;
    let patch: UpdateStudent = params(req, Some("patch"))?;
    Ok(reply(req, directory(state, req)?.update_student(&student_id, &patch)))
}

fn handle_students_delete(state: &AppState, req: &Request) -> Reply {
    let student_id = required_str(req, "studentId")?;
    Ok(reply(req, directory(state, req)?.deactivate_student(&student_id)))
}

fn handle_students_summary(state: &AppState, req: &Request) -> Reply {
    let student_id = required_str(req, "studentId")?;
    let window: WindowFilter = params(req, Some("window"))?;
    let store = store(state, req)?;
    Ok(reply(
        req,
        analytics::student_summary(store, &student_id, &window, &state.risk),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.get" => handle_students_get(state, req),
        "students.findByBarcode" => handle_students_find(state, req),
        "students.create" => handle_students_create(state, req),
        "students.update" => handle_students_update(state, req),
        "students.delete" => handle_students_delete(state, req),
        "students.summary" => handle_students_summary(state, req),
        _ => return None,
    };
    Some(r.unwrap_or_else(|e| e))
}
