use chrono::NaiveDate;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::repository;
use crate::error::AppError;
use crate::models::{
    AbsenceWithCourse, AttendanceRecord, AttendanceStatus, NewAttendanceRequest,
    UpdateAttendanceRequest,
};

const ALREADY_MARKED: &str = "Attendance already marked for this date";

/// Invariant-preserving attendance operations. Every mutation keeps the
/// owning course's counters in step with its records:
/// total_classes = number of records, attended_classes = number of
/// records with status = present.
pub struct AttendanceLedger {
    db: SqlitePool,
}

#[derive(Debug, Serialize)]
pub struct RecountStats {
    pub total_classes: i64,
    pub attended_classes: i64,
    pub repaired: bool,
}

impl AttendanceLedger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create one attendance record for (course, date) and bump the
    /// course counters, all in one transaction.
    pub async fn mark(&self, req: NewAttendanceRequest) -> Result<AttendanceRecord, AppError> {
        ensure_valid_id(&req.course_id)?;
        let date = normalize_date(&req.date)?;

        let mut tx = self.db.begin().await?;

        if repository::find_course_by_id(&mut *tx, &req.course_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound("Course"));
        }

        // Friendly pre-check only; the UNIQUE(course_id, date) index is
        // what actually holds under concurrent identical requests.
        if repository::find_attendance_by_course_and_date(&mut *tx, &req.course_id, &date)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(ALREADY_MARKED.to_string()));
        }

        let record = match repository::insert_attendance(&mut *tx, &req, &date).await {
            Ok(record) => record,
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::Conflict(ALREADY_MARKED.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let attended_delta = i64::from(record.status == AttendanceStatus::Present);
        repository::apply_counter_delta(&mut *tx, &req.course_id, 1, attended_delta).await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Edit status and/or notes. A status flip moves attended_classes by
    /// one; total_classes counts records, not presences, so it never moves
    /// here. A no-op status edit applies a zero delta.
    pub async fn update(
        &self,
        id: &str,
        req: UpdateAttendanceRequest,
    ) -> Result<AttendanceRecord, AppError> {
        ensure_valid_id(id)?;

        let mut tx = self.db.begin().await?;

        let current = repository::find_attendance_by_id(&mut *tx, id)
            .await?
            .ok_or(AppError::NotFound("Attendance record"))?;

        let new_status = req.status.unwrap_or(current.status);
        let new_notes = req.notes.unwrap_or_else(|| current.notes.clone());

        repository::update_attendance_fields(&mut *tx, id, new_status, &new_notes).await?;

        let delta = status_delta(current.status, new_status);
        if delta != 0 {
            repository::apply_counter_delta(&mut *tx, &current.course_id, 0, delta).await?;
        }

        tx.commit().await?;
        Ok(AttendanceRecord {
            status: new_status,
            notes: new_notes,
            ..current
        })
    }

    /// Remove one record and roll its contribution out of the counters.
    /// The record is read before either write so the deltas come from the
    /// pre-deletion snapshot.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        ensure_valid_id(id)?;

        let mut tx = self.db.begin().await?;

        let record = repository::find_attendance_by_id(&mut *tx, id)
            .await?
            .ok_or(AppError::NotFound("Attendance record"))?;

        let attended_delta = -i64::from(record.status == AttendanceStatus::Present);
        repository::apply_counter_delta(&mut *tx, &record.course_id, -1, attended_delta).await?;
        repository::delete_attendance(&mut *tx, id).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Delete a course together with every record that references it, so
    /// no orphan records survive. No counter maintenance: the course row
    /// goes away with its counters.
    pub async fn delete_course(&self, id: &str) -> Result<(), AppError> {
        ensure_valid_id(id)?;

        let mut tx = self.db.begin().await?;

        if repository::find_course_by_id(&mut *tx, id).await?.is_none() {
            return Err(AppError::NotFound("Course"));
        }

        let removed = repository::delete_attendance_for_course(&mut *tx, id).await?;
        repository::delete_course(&mut *tx, id).await?;

        tx.commit().await?;
        info!("Deleted course {} and {} attendance records", id, removed);
        Ok(())
    }

    /// All records for a course, most recent date first. Pure read; an
    /// unknown (or deleted) course id yields an empty list.
    pub async fn list_for_course(&self, course_id: &str) -> Result<Vec<AttendanceRecord>, AppError> {
        ensure_valid_id(course_id)?;
        let records = repository::fetch_attendance_for_course(&self.db, course_id).await?;
        Ok(records)
    }

    /// Every absent record, most recent date first, joined with the owning
    /// course's name and color. Best-effort enrichment: a record whose
    /// course is gone is skipped, but cascade deletion should make that
    /// unreachable, so seeing one means an invariant was violated.
    pub async fn list_absences(&self) -> Result<Vec<AbsenceWithCourse>, AppError> {
        let absences = repository::fetch_absences(&self.db).await?;

        let mut result = Vec::with_capacity(absences.len());
        for record in absences {
            match repository::find_course_by_id(&self.db, &record.course_id).await? {
                Some(course) => result.push(AbsenceWithCourse {
                    record,
                    course_name: course.name,
                    course_color: course.color,
                }),
                None => {
                    warn!(
                        "absence {} references missing course {}, skipping",
                        record.id, record.course_id
                    );
                }
            }
        }

        Ok(result)
    }

    /// Consistency repair: recompute both counters from the raw records and
    /// overwrite the stored values. Run after a transient store failure
    /// mid-operation instead of blindly retrying, so nothing gets counted
    /// twice.
    pub async fn recount(&self, course_id: &str) -> Result<RecountStats, AppError> {
        ensure_valid_id(course_id)?;

        let mut tx = self.db.begin().await?;

        let course = repository::find_course_by_id(&mut *tx, course_id)
            .await?
            .ok_or(AppError::NotFound("Course"))?;

        let total = repository::count_attendance_for_course(&mut *tx, course_id).await?;
        let attended = repository::count_present_for_course(&mut *tx, course_id).await?;

        let repaired = course.total_classes != total || course.attended_classes != attended;
        if repaired {
            warn!(
                "counter drift on course {}: stored {}/{}, actual {}/{}",
                course_id,
                course.attended_classes,
                course.total_classes,
                attended,
                total
            );
            repository::set_counters(&mut *tx, course_id, total, attended).await?;
        }

        tx.commit().await?;
        Ok(RecountStats {
            total_classes: total,
            attended_classes: attended,
            repaired,
        })
    }
}

pub fn ensure_valid_id(id: &str) -> Result<(), AppError> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| AppError::BadRequest(format!("Invalid identifier: {id}")))
}

fn normalize_date(raw: &str) -> Result<String, AppError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.format("%Y-%m-%d").to_string())
        .map_err(|_| AppError::BadRequest(format!("Invalid date: {raw}, expected YYYY-MM-DD")))
}

fn status_delta(old: AttendanceStatus, new: AttendanceStatus) -> i64 {
    match (old, new) {
        (AttendanceStatus::Absent, AttendanceStatus::Present) => 1,
        (AttendanceStatus::Present, AttendanceStatus::Absent) => -1,
        _ => 0,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
