use crate::error::{CoreError, CoreResult};
use crate::model::Class;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

pub(crate) const COLUMNS: &str =
    "id, name, description, grade_level, capacity, teacher_name, created_at, updated_at";

pub(crate) fn from_row(r: &Row<'_>) -> rusqlite::Result<Class> {
    Ok(Class {
        id: r.get(0)?,
        name: r.get(1)?,
        description: r.get(2)?,
        grade_level: r.get(3)?,
        capacity: r.get(4)?,
        teacher_name: r.get(5)?,
        created_at: r.get(6)?,
        updated_at: r.get(7)?,
    })
}

#[derive(Debug, Clone)]
pub struct NewClass {
    pub name: String,
    pub description: Option<String>,
    pub grade_level: String,
    pub capacity: i64,
    pub teacher_name: Option<String>,
}

/// Validated partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ClassPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub grade_level: Option<String>,
    pub capacity: Option<i64>,
    pub teacher_name: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassListRow {
    #[serde(flatten)]
    pub class: Class,
    pub student_count: i64,
    pub session_count: i64,
}

pub fn name_taken(conn: &Connection, name: &str, except_id: Option<&str>) -> CoreResult<bool> {
    let hit: Option<String> = conn
        .query_row(
            "SELECT id FROM classes WHERE name = ? AND id IS NOT ?",
            params![name, except_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

pub fn insert(conn: &Connection, new: &NewClass, now: NaiveDateTime) -> CoreResult<Class> {
    if name_taken(conn, &new.name, None)? {
        return Err(CoreError::Conflict(format!(
            "class name already exists: {}",
            new.name
        )));
    }
    let class = Class {
        id: super::new_id(),
        name: new.name.clone(),
        description: new.description.clone(),
        grade_level: new.grade_level.clone(),
        capacity: new.capacity,
        teacher_name: new.teacher_name.clone(),
        created_at: now,
        updated_at: now,
    };
    conn.execute(
        &format!("INSERT INTO classes({}) VALUES(?, ?, ?, ?, ?, ?, ?, ?)", COLUMNS),
        params![
            class.id,
            class.name,
            class.description,
            class.grade_level,
            class.capacity,
            class.teacher_name,
            class.created_at,
            class.updated_at
        ],
    )?;
    Ok(class)
}

pub fn get(conn: &Connection, id: &str) -> CoreResult<Option<Class>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM classes WHERE id = ?", COLUMNS),
            [id],
            from_row,
        )
        .optional()?)
}

pub fn require(conn: &Connection, id: &str) -> CoreResult<Class> {
    get(conn, id)?.ok_or_else(|| CoreError::not_found("class", id))
}

pub fn exists(conn: &Connection, id: &str) -> CoreResult<bool> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [id], |r| r.get(0))
        .optional()?;
    Ok(hit.is_some())
}

pub fn list(conn: &Connection) -> CoreResult<Vec<ClassListRow>> {
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = conn.prepare(&format!(
        "SELECT {},
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id AND s.active = 1),
           (SELECT COUNT(*) FROM sessions x WHERE x.class_id = c.id)
         FROM classes c
         ORDER BY c.name",
        COLUMNS
            .split(", ")
            .map(|c| format!("c.{}", c))
            .collect::<Vec<_>>()
            .join(", ")
    ))?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ClassListRow {
                class: from_row(r)?,
                student_count: r.get(8)?,
                session_count: r.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update(conn: &Connection, id: &str, patch: &ClassPatch, now: NaiveDateTime) -> CoreResult<Class> {
    let mut current = require(conn, id)?;
    if let Some(name) = &patch.name {
        if name_taken(conn, name, Some(id))? {
            return Err(CoreError::Conflict(format!(
                "class name already exists: {}",
                name
            )));
        }
        current.name = name.clone();
    }
    if let Some(v) = &patch.description {
        current.description = v.clone();
    }
    if let Some(v) = &patch.grade_level {
        current.grade_level = v.clone();
    }
    if let Some(v) = patch.capacity {
        current.capacity = v;
    }
    if let Some(v) = &patch.teacher_name {
        current.teacher_name = v.clone();
    }
    current.updated_at = now;
    conn.execute(
        "UPDATE classes
         SET name = ?, description = ?, grade_level = ?, capacity = ?, teacher_name = ?, updated_at = ?
         WHERE id = ?",
        params![
            current.name,
            current.description,
            current.grade_level,
            current.capacity,
            current.teacher_name,
            current.updated_at,
            id
        ],
    )?;
    Ok(current)
}

/// A class may only be removed once it owns no students and no sessions.
pub fn delete(conn: &Connection, id: &str) -> CoreResult<()> {
    if !exists(conn, id)? {
        return Err(CoreError::not_found("class", id));
    }
    let students: i64 = conn.query_row(
        "SELECT COUNT(*) FROM students WHERE class_id = ?",
        [id],
        |r| r.get(0),
    )?;
    if students > 0 {
        return Err(CoreError::Conflict(
            "cannot delete class with enrolled students".to_string(),
        ));
    }
    let sessions: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sessions WHERE class_id = ?",
        [id],
        |r| r.get(0),
    )?;
    if sessions > 0 {
        return Err(CoreError::Conflict(
            "cannot delete class with existing sessions".to_string(),
        ));
    }
    conn.execute("DELETE FROM classes WHERE id = ?", [id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::Store;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(7, 0, 0)
            .unwrap()
    }

    fn new_class(name: &str) -> NewClass {
        NewClass {
            name: name.to_string(),
            description: None,
            grade_level: "Grade 1".to_string(),
            capacity: 30,
            teacher_name: Some("Ms. Reyes".to_string()),
        }
    }

    #[test]
    fn duplicate_name_is_conflict() {
        let store = Store::open_in_memory().unwrap();
        insert(store.conn(), &new_class("1A"), now()).unwrap();
        let e = insert(store.conn(), &new_class("1A"), now()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn rename_checks_other_rows_only() {
        let store = Store::open_in_memory().unwrap();
        let a = insert(store.conn(), &new_class("1A"), now()).unwrap();
        insert(store.conn(), &new_class("1B"), now()).unwrap();

        let same = ClassPatch {
            name: Some("1A".to_string()),
            ..Default::default()
        };
        assert!(update(store.conn(), &a.id, &same, now()).is_ok());

        let clash = ClassPatch {
            name: Some("1B".to_string()),
            ..Default::default()
        };
        assert_eq!(
            update(store.conn(), &a.id, &clash, now()).unwrap_err().kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn delete_refuses_class_with_students() {
        let store = Store::open_in_memory().unwrap();
        let c = insert(store.conn(), &new_class("1A"), now()).unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO students(id, barcode, name, class_id, active, created_at, updated_at)
                 VALUES('s1', 'B1', 'Ana', ?, 1, '2026-03-02 07:00:00', '2026-03-02 07:00:00')",
                [&c.id],
            )
            .unwrap();
        assert_eq!(delete(store.conn(), &c.id).unwrap_err().kind(), ErrorKind::Conflict);

        let empty = insert(store.conn(), &new_class("1C"), now()).unwrap();
        delete(store.conn(), &empty.id).unwrap();
        assert!(get(store.conn(), &empty.id).unwrap().is_none());
        assert_eq!(delete(store.conn(), &empty.id).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn list_counts_students_and_sessions() {
        let store = Store::open_in_memory().unwrap();
        let c = insert(store.conn(), &new_class("1A"), now()).unwrap();
        let rows = list(store.conn()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].class.id, c.id);
        assert_eq!(rows[0].student_count, 0);
        assert_eq!(rows[0].session_count, 0);
    }
}
