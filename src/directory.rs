//! Validated class and student management.

use crate::clock::Clock;
use crate::codec::ContactCodec;
use crate::error::{CoreError, CoreResult};
use crate::model::{Class, Contact, Student, StudentSummary};
use crate::store::classes::{ClassListRow, ClassPatch, NewClass};
use crate::store::students::{NewStudent, StudentPatch, StudentQuery};
use crate::store::{classes, students, Store};
use crate::validate;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClass {
    pub name: String,
    pub description: Option<String>,
    pub grade_level: String,
    pub capacity: i64,
    pub teacher_name: Option<String>,
}

/// Blank `description` or `teacherName` clears the field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateClass {
    pub name: Option<String>,
    pub description: Option<String>,
    pub grade_level: Option<String>,
    pub capacity: Option<i64>,
    pub teacher_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDetail {
    #[serde(flatten)]
    pub class: Class,
    pub student_count: usize,
    /// Capacity is advisory: enrollment past it is allowed and this stays at 0.
    pub available_spots: i64,
    pub students: Vec<StudentSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStudent {
    pub barcode: String,
    pub name: String,
    pub class_id: Option<String>,
    pub parent_phone: Option<String>,
    pub emergency_phone: Option<String>,
    pub parent_email: Option<String>,
}

/// Blank optional fields clear them. The barcode cannot change.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateStudent {
    pub barcode: Option<String>,
    pub name: Option<String>,
    pub class_id: Option<String>,
    pub parent_phone: Option<String>,
    pub emergency_phone: Option<String>,
    pub parent_email: Option<String>,
    pub active: Option<bool>,
}

/// Student with decrypted contact fields.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDetail {
    #[serde(flatten)]
    pub student: Student,
    pub contact: Contact,
}

pub struct Directory<'a> {
    store: &'a Store,
    clock: &'a dyn Clock,
    codec: &'a dyn ContactCodec,
}

fn blank_clears(v: Option<&str>) -> Option<Option<&str>> {
    v.map(|s| Some(s).filter(|s| !s.trim().is_empty()))
}

impl<'a> Directory<'a> {
    pub fn new(store: &'a Store, clock: &'a dyn Clock, codec: &'a dyn ContactCodec) -> Self {
        Self {
            store,
            clock,
            codec,
        }
    }

    fn detail(&self, student: Student) -> CoreResult<StudentDetail> {
        let contact = self.codec.open(&student.sealed)?;
        Ok(StudentDetail { student, contact })
    }

    pub fn create_class(&self, req: &CreateClass) -> CoreResult<Class> {
        let new = NewClass {
            name: validate::required_text("name", &req.name, 2, 100)?,
            description: validate::optional_text("description", req.description.as_deref(), 500)?,
            grade_level: validate::required_text("gradeLevel", &req.grade_level, 2, 50)?,
            capacity: validate::int_range("capacity", req.capacity, 1, 100)?,
            teacher_name: validate::optional_text("teacherName", req.teacher_name.as_deref(), 100)?,
        };
        let tx = self.store.write_tx()?;
        let class = classes::insert(&tx, &new, self.clock.now())?;
        tx.commit()?;
        info!(class_id = %class.id, name = %class.name, "class created");
        Ok(class)
    }

    pub fn update_class(&self, class_id: &str, req: &UpdateClass) -> CoreResult<Class> {
        let patch = ClassPatch {
            name: req
                .name
                .as_deref()
                .map(|v| validate::required_text("name", v, 2, 100))
                .transpose()?,
            description: blank_clears(req.description.as_deref())
                .map(|v| validate::optional_text("description", v, 500))
                .transpose()?,
            grade_level: req
                .grade_level
                .as_deref()
                .map(|v| validate::required_text("gradeLevel", v, 2, 50))
                .transpose()?,
            capacity: req
                .capacity
                .map(|v| validate::int_range("capacity", v, 1, 100))
                .transpose()?,
            teacher_name: blank_clears(req.teacher_name.as_deref())
                .map(|v| validate::optional_text("teacherName", v, 100))
                .transpose()?,
        };
        if patch.name.is_none()
            && patch.description.is_none()
            && patch.grade_level.is_none()
            && patch.capacity.is_none()
            && patch.teacher_name.is_none()
        {
            return Err(CoreError::validation("params", "no updatable field supplied"));
        }
        let tx = self.store.write_tx()?;
        let class = classes::update(&tx, class_id, &patch, self.clock.now())?;
        tx.commit()?;
        info!(class_id, "class updated");
        Ok(class)
    }

    pub fn delete_class(&self, class_id: &str) -> CoreResult<()> {
        let tx = self.store.write_tx()?;
        classes::delete(&tx, class_id)?;
        tx.commit()?;
        info!(class_id, "class deleted");
        Ok(())
    }

    pub fn list_classes(&self) -> CoreResult<Vec<ClassListRow>> {
        classes::list(self.store.conn())
    }

    pub fn get_class(&self, class_id: &str) -> CoreResult<ClassDetail> {
        let tx = self.store.read_tx()?;
        let class = classes::require(&tx, class_id)?;
        let members = students::active_in_class(&tx, class_id)?;
        tx.commit()?;
        Ok(ClassDetail {
            student_count: members.len(),
            available_spots: (class.capacity - members.len() as i64).max(0),
            students: members.iter().map(StudentSummary::from).collect(),
            class,
        })
    }

    pub fn create_student(&self, req: &CreateStudent) -> CoreResult<StudentDetail> {
        let contact = Contact {
            parent_phone: validate::optional_phone("parentPhone", req.parent_phone.as_deref())?,
            emergency_phone: validate::optional_phone(
                "emergencyPhone",
                req.emergency_phone.as_deref(),
            )?,
        };
        let new = NewStudent {
            barcode: validate::required_text("barcode", &req.barcode, 1, 50)?,
            name: validate::required_text("name", &req.name, 2, 100)?,
            class_id: req
                .class_id
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            parent_email: validate::optional_email("parentEmail", req.parent_email.as_deref())?,
            sealed: self.codec.seal(&contact)?,
        };
        let tx = self.store.write_tx()?;
        let student = students::insert(&tx, &new, self.clock.now())?;
        tx.commit()?;
        info!(student_id = %student.id, barcode = %student.barcode, "student created");
        Ok(StudentDetail { student, contact })
    }

    pub fn update_student(&self, student_id: &str, req: &UpdateStudent) -> CoreResult<StudentDetail> {
        let seal = |field: &str, v: Option<&str>| -> CoreResult<Option<String>> {
            match validate::optional_phone(field, v)? {
                Some(p) => Ok(Some(self.codec.encrypt(&p)?)),
                None => Ok(None),
            }
        };
        let tx = self.store.write_tx()?;
        let current = students::require(&tx, student_id)?;
        if let Some(b) = &req.barcode {
            if b.trim() != current.barcode {
                return Err(CoreError::validation("barcode", "cannot be changed"));
            }
        }
        let patch = StudentPatch {
            name: req
                .name
                .as_deref()
                .map(|v| validate::required_text("name", v, 2, 100))
                .transpose()?,
            class_id: blank_clears(req.class_id.as_deref())
                .map(|v| v.map(|c| c.trim().to_string())),
            parent_email: blank_clears(req.parent_email.as_deref())
                .map(|v| validate::optional_email("parentEmail", v))
                .transpose()?,
            parent_phone: blank_clears(req.parent_phone.as_deref())
                .map(|v| seal("parentPhone", v))
                .transpose()?,
            emergency_phone: blank_clears(req.emergency_phone.as_deref())
                .map(|v| seal("emergencyPhone", v))
                .transpose()?,
            active: req.active,
        };
        if patch.name.is_none()
            && patch.class_id.is_none()
            && patch.parent_email.is_none()
            && patch.parent_phone.is_none()
            && patch.emergency_phone.is_none()
            && patch.active.is_none()
        {
            return Err(CoreError::validation("params", "no updatable field supplied"));
        }
        let student = students::update(&tx, student_id, &patch, self.clock.now())?;
        tx.commit()?;
        info!(student_id, "student updated");
        self.detail(student)
    }

    /// Soft delete; history stays attached.
    pub fn deactivate_student(&self, student_id: &str) -> CoreResult<Student> {
        let tx = self.store.write_tx()?;
        let student = students::deactivate(&tx, student_id, self.clock.now())?;
        tx.commit()?;
        info!(student_id, "student deactivated");
        Ok(student)
    }

    pub fn get_student(&self, student_id: &str) -> CoreResult<StudentDetail> {
        self.detail(students::require(self.store.conn(), student_id)?)
    }

    pub fn find_student(&self, barcode: &str) -> CoreResult<StudentDetail> {
        let barcode = validate::required_text("barcode", barcode, 1, 50)?;
        let student = students::find_by_barcode(self.store.conn(), &barcode)?
            .ok_or_else(|| CoreError::not_found("student", barcode))?;
        self.detail(student)
    }

    pub fn list_students(&self, q: &StudentQuery) -> CoreResult<Vec<StudentDetail>> {
        students::list(self.store.conn(), q)?
            .into_iter()
            .map(|s| self.detail(s))
            .collect()
    }
}
