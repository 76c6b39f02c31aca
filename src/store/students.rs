use crate::error::{CoreError, CoreResult};
use crate::model::{SealedContact, Student};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;

pub(crate) const COLUMNS: &str = "id, barcode, name, class_id, parent_email, active, \
                       parent_phone_enc, emergency_phone_enc, created_at, updated_at";

pub(crate) fn from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        barcode: r.get(1)?,
        name: r.get(2)?,
        class_id: r.get(3)?,
        parent_email: r.get(4)?,
        active: r.get::<_, i64>(5)? != 0,
        sealed: SealedContact {
            parent_phone: r.get(6)?,
            emergency_phone: r.get(7)?,
        },
        created_at: r.get(8)?,
        updated_at: r.get(9)?,
    })
}

/// Row to insert. Contact fields arrive already sealed by the codec.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub barcode: String,
    pub name: String,
    pub class_id: Option<String>,
    pub parent_email: Option<String>,
    pub sealed: SealedContact,
}

#[derive(Debug, Clone, Default)]
pub struct StudentPatch {
    pub name: Option<String>,
    pub class_id: Option<Option<String>>,
    pub parent_email: Option<Option<String>>,
    pub parent_phone: Option<Option<String>>,
    pub emergency_phone: Option<Option<String>>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StudentQuery {
    pub class_id: Option<String>,
    pub include_inactive: bool,
    pub search: Option<String>,
}

pub fn barcode_taken(conn: &Connection, barcode: &str) -> CoreResult<bool> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE barcode = ?", [barcode], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(hit.is_some())
}

pub fn insert(conn: &Connection, new: &NewStudent, now: NaiveDateTime) -> CoreResult<Student> {
    if barcode_taken(conn, &new.barcode)? {
        return Err(CoreError::Conflict(format!(
            "barcode already assigned: {}",
            new.barcode
        )));
    }
    if let Some(class_id) = &new.class_id {
        if !super::classes::exists(conn, class_id)? {
            return Err(CoreError::not_found("class", class_id.as_str()));
        }
    }
    let student = Student {
        id: super::new_id(),
        barcode: new.barcode.clone(),
        name: new.name.clone(),
        class_id: new.class_id.clone(),
        parent_email: new.parent_email.clone(),
        active: true,
        sealed: new.sealed.clone(),
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        &format!(
            "INSERT INTO students({}) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            COLUMNS
        ),
        params![
            student.id,
            student.barcode,
            student.name,
            student.class_id,
            student.parent_email,
            1i64,
            student.sealed.parent_phone,
            student.sealed.emergency_phone,
            student.created_at,
            student.updated_at
        ],
    )?;
    Ok(student)
}

pub fn get(conn: &Connection, id: &str) -> CoreResult<Option<Student>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM students WHERE id = ?", COLUMNS),
            [id],
            from_row,
        )
        .optional()?)
}

pub fn require(conn: &Connection, id: &str) -> CoreResult<Student> {
    get(conn, id)?.ok_or_else(|| CoreError::not_found("student", id))
}

pub fn find_by_barcode(conn: &Connection, barcode: &str) -> CoreResult<Option<Student>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM students WHERE barcode = ?", COLUMNS),
            [barcode],
            from_row,
        )
        .optional()?)
}

pub fn list(conn: &Connection, q: &StudentQuery) -> CoreResult<Vec<Student>> {
    let mut sql = format!("SELECT {} FROM students WHERE 1 = 1", COLUMNS);
    let mut args: Vec<String> = Vec::new();
    if let Some(class_id) = &q.class_id {
        sql.push_str(" AND class_id = ?");
        args.push(class_id.clone());
    }
    if !q.include_inactive {
        sql.push_str(" AND active = 1");
    }
    if let Some(search) = q.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        sql.push_str(" AND (name LIKE ? OR barcode LIKE ?)");
        let pat = format!("%{}%", search);
        args.push(pat.clone());
        args.push(pat);
    }
    sql.push_str(" ORDER BY name, barcode");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Active members of a class, in name order.
pub fn active_in_class(conn: &Connection, class_id: &str) -> CoreResult<Vec<Student>> {
    list(
        conn,
        &StudentQuery {
            class_id: Some(class_id.to_string()),
            ..Default::default()
        },
    )
}

pub fn update(
    conn: &Connection,
    id: &str,
    patch: &StudentPatch,
    now: NaiveDateTime,
) -> CoreResult<Student> {
    let mut current = require(conn, id)?;
    if let Some(v) = &patch.name {
        current.name = v.clone();
    }
    if let Some(v) = &patch.class_id {
        if let Some(class_id) = v {
            if !super::classes::exists(conn, class_id)? {
                return Err(CoreError::not_found("class", class_id.as_str()));
            }
        }
        current.class_id = v.clone();
    }
    if let Some(v) = &patch.parent_email {
        current.parent_email = v.clone();
    }
    if let Some(v) = &patch.parent_phone {
        current.sealed.parent_phone = v.clone();
    }
    if let Some(v) = &patch.emergency_phone {
        current.sealed.emergency_phone = v.clone();
    }
    if let Some(v) = patch.active {
        current.active = v;
    }
    current.updated_at = now;
    conn.execute(
        "UPDATE students
         SET name = ?, class_id = ?, parent_email = ?, active = ?,
             parent_phone_enc = ?, emergency_phone_enc = ?, updated_at = ?
         WHERE id = ?",
        params![
            current.name,
            current.class_id,
            current.parent_email,
            current.active as i64,
            current.sealed.parent_phone,
            current.sealed.emergency_phone,
            current.updated_at,
            id
        ],
    )?;
    Ok(current)
}

/// Soft delete. Attendance history keeps pointing at the row.
pub fn deactivate(conn: &Connection, id: &str, now: NaiveDateTime) -> CoreResult<Student> {
    update(
        conn,
        id,
        &StudentPatch {
            active: Some(false),
            ..Default::default()
        },
        now,
    )
}
