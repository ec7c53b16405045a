use chrono::Utc;
use sqlx::{SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::models::{
    AttendanceRecord, AttendanceStatus, Course, NewAttendanceRequest, NewCourseRequest,
    UpdateCourseRequest,
};

const DEFAULT_COURSE_COLOR: &str = "#4A90E2";

const COURSE_COLUMNS: &str = "id, name, course_type, schedule, min_attendance_percentage, \
     total_classes, attended_classes, color, total_classes_in_semester, created_at";

fn encode_schedule(schedule: &[crate::models::ScheduleSlot]) -> Result<String, sqlx::Error> {
    serde_json::to_string(schedule).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

pub async fn fetch_courses(exec: impl SqliteExecutor<'_>) -> Result<Vec<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses ORDER BY created_at DESC"
    ))
    .fetch_all(exec)
    .await
}

pub async fn find_course_by_id(
    exec: impl SqliteExecutor<'_>,
    id: &str,
) -> Result<Option<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(exec)
    .await
}

pub async fn insert_course(
    exec: impl SqliteExecutor<'_>,
    req: NewCourseRequest,
) -> Result<Course, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let color = req
        .color
        .unwrap_or_else(|| DEFAULT_COURSE_COLOR.to_string());
    let schedule_json = encode_schedule(&req.schedule)?;

    sqlx::query(
        r#"
        INSERT INTO courses
            (id, name, course_type, schedule, min_attendance_percentage,
            total_classes, attended_classes, color, total_classes_in_semester, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?7, ?8)
        "#,
    )
    .bind(&id)
    .bind(&req.name)
    .bind(req.course_type)
    .bind(&schedule_json)
    .bind(req.min_attendance_percentage)
    .bind(&color)
    .bind(req.total_classes_in_semester)
    .bind(&now)
    .execute(exec)
    .await?;

    Ok(Course {
        id,
        name: req.name,
        course_type: req.course_type,
        schedule: req.schedule,
        min_attendance_percentage: req.min_attendance_percentage,
        total_classes: 0,
        attended_classes: 0,
        color,
        total_classes_in_semester: req.total_classes_in_semester,
        created_at: now,
    })
}

pub async fn update_course(
    db: &SqlitePool,
    id: &str,
    req: UpdateCourseRequest,
) -> Result<Option<Course>, sqlx::Error> {
    let mut current = match find_course_by_id(db, id).await? {
        Some(c) => c,
        None => return Ok(None),
    };

    if let Some(name) = req.name {
        current.name = name;
    }
    if let Some(course_type) = req.course_type {
        current.course_type = course_type;
    }
    if let Some(schedule) = req.schedule {
        current.schedule = schedule;
    }
    if let Some(pct) = req.min_attendance_percentage {
        current.min_attendance_percentage = pct;
    }
    if let Some(color) = req.color {
        current.color = color;
    }
    let schedule_json = encode_schedule(&current.schedule)?;

    // Counter fields are never part of a direct course edit.
    sqlx::query(
        r#"
        UPDATE courses
        SET name = ?1,
            course_type = ?2,
            schedule = ?3,
            min_attendance_percentage = ?4,
            color = ?5
        WHERE id = ?6
        "#,
    )
    .bind(&current.name)
    .bind(current.course_type)
    .bind(&schedule_json)
    .bind(current.min_attendance_percentage)
    .bind(&current.color)
    .bind(id)
    .execute(db)
    .await?;

    Ok(Some(current))
}

pub async fn delete_course(exec: impl SqliteExecutor<'_>, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(id)
        .execute(exec)
        .await?
        .rows_affected();

    Ok(result > 0)
}

/// Relative counter update as a single atomic statement. Concurrent callers
/// on different dates of the same course never lose an update because the
/// arithmetic happens in the store, not in application code.
pub async fn apply_counter_delta(
    exec: impl SqliteExecutor<'_>,
    course_id: &str,
    total_delta: i64,
    attended_delta: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE courses
        SET total_classes = total_classes + ?1,
            attended_classes = attended_classes + ?2
        WHERE id = ?3
        "#,
    )
    .bind(total_delta)
    .bind(attended_delta)
    .bind(course_id)
    .execute(exec)
    .await?;

    Ok(result.rows_affected())
}

/// Absolute counter overwrite, used only by the recount repair pass.
pub async fn set_counters(
    exec: impl SqliteExecutor<'_>,
    course_id: &str,
    total_classes: i64,
    attended_classes: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE courses SET total_classes = ?1, attended_classes = ?2 WHERE id = ?3",
    )
    .bind(total_classes)
    .bind(attended_classes)
    .bind(course_id)
    .execute(exec)
    .await?;

    Ok(result.rows_affected())
}

pub async fn find_attendance_by_id(
    exec: impl SqliteExecutor<'_>,
    id: &str,
) -> Result<Option<AttendanceRecord>, sqlx::Error> {
    sqlx::query_as::<_, AttendanceRecord>(
        "SELECT id, course_id, date, status, notes FROM attendance_records WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(exec)
    .await
}

pub async fn find_attendance_by_course_and_date(
    exec: impl SqliteExecutor<'_>,
    course_id: &str,
    date: &str,
) -> Result<Option<AttendanceRecord>, sqlx::Error> {
    sqlx::query_as::<_, AttendanceRecord>(
        "SELECT id, course_id, date, status, notes FROM attendance_records WHERE course_id = ? AND date = ?",
    )
    .bind(course_id)
    .bind(date)
    .fetch_optional(exec)
    .await
}

/// Insert relies on the UNIQUE(course_id, date) index as the authoritative
/// duplicate guard; callers map the unique violation to a conflict.
pub async fn insert_attendance(
    exec: impl SqliteExecutor<'_>,
    req: &NewAttendanceRequest,
    date: &str,
) -> Result<AttendanceRecord, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let notes = req.notes.clone().unwrap_or_default();

    sqlx::query(
        r#"
        INSERT INTO attendance_records (id, course_id, date, status, notes)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(&id)
    .bind(&req.course_id)
    .bind(date)
    .bind(req.status)
    .bind(&notes)
    .execute(exec)
    .await?;

    Ok(AttendanceRecord {
        id,
        course_id: req.course_id.clone(),
        date: date.to_string(),
        status: req.status,
        notes,
    })
}

pub async fn update_attendance_fields(
    exec: impl SqliteExecutor<'_>,
    id: &str,
    status: AttendanceStatus,
    notes: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE attendance_records SET status = ?1, notes = ?2 WHERE id = ?3")
        .bind(status)
        .bind(notes)
        .bind(id)
        .execute(exec)
        .await?;

    Ok(result.rows_affected())
}

pub async fn delete_attendance(
    exec: impl SqliteExecutor<'_>,
    id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM attendance_records WHERE id = ?")
        .bind(id)
        .execute(exec)
        .await?
        .rows_affected();

    Ok(result > 0)
}

pub async fn delete_attendance_for_course(
    exec: impl SqliteExecutor<'_>,
    course_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM attendance_records WHERE course_id = ?")
        .bind(course_id)
        .execute(exec)
        .await?;

    Ok(result.rows_affected())
}

pub async fn fetch_attendance_for_course(
    exec: impl SqliteExecutor<'_>,
    course_id: &str,
) -> Result<Vec<AttendanceRecord>, sqlx::Error> {
    sqlx::query_as::<_, AttendanceRecord>(
        r#"
        SELECT id, course_id, date, status, notes
        FROM attendance_records
        WHERE course_id = ?
        ORDER BY date DESC
        "#,
    )
    .bind(course_id)
    .fetch_all(exec)
    .await
}

pub async fn fetch_absences(
    exec: impl SqliteExecutor<'_>,
) -> Result<Vec<AttendanceRecord>, sqlx::Error> {
    sqlx::query_as::<_, AttendanceRecord>(
        r#"
        SELECT id, course_id, date, status, notes
        FROM attendance_records
        WHERE status = 'absent'
        ORDER BY date DESC
        "#,
    )
    .fetch_all(exec)
    .await
}

pub async fn count_attendance_for_course(
    exec: impl SqliteExecutor<'_>,
    course_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM attendance_records WHERE course_id = ?")
        .bind(course_id)
        .fetch_one(exec)
        .await
}

pub async fn count_present_for_course(
    exec: impl SqliteExecutor<'_>,
    course_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM attendance_records WHERE course_id = ? AND status = 'present'",
    )
    .bind(course_id)
    .fetch_one(exec)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CourseType, ScheduleSlot};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test db");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    fn course_request(name: &str) -> NewCourseRequest {
        NewCourseRequest {
            name: name.to_string(),
            course_type: CourseType::Course,
            schedule: vec![ScheduleSlot {
                day: "Monday".to_string(),
                start_time: "10:00".to_string(),
                end_time: "12:00".to_string(),
            }],
            min_attendance_percentage: 75.0,
            color: None,
            total_classes_in_semester: Some(28),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_course() {
        let pool = setup_test_db().await;

        let course = insert_course(&pool, course_request("Linear Algebra"))
            .await
            .expect("Failed to insert course");
        assert_eq!(course.name, "Linear Algebra");
        assert_eq!(course.total_classes, 0);
        assert_eq!(course.attended_classes, 0);
        assert_eq!(course.color, DEFAULT_COURSE_COLOR);

        let courses = fetch_courses(&pool).await.expect("Failed to fetch courses");
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].id, course.id);
        assert_eq!(courses[0].schedule, course.schedule);
    }

    #[tokio::test]
    async fn test_update_course_leaves_counters_alone() {
        let pool = setup_test_db().await;

        let course = insert_course(&pool, course_request("Databases"))
            .await
            .expect("Failed to insert course");
        apply_counter_delta(&pool, &course.id, 3, 2)
            .await
            .expect("Failed to bump counters");

        let updated = update_course(
            &pool,
            &course.id,
            UpdateCourseRequest {
                name: Some("Databases II".to_string()),
                course_type: None,
                schedule: None,
                min_attendance_percentage: None,
                color: Some("#112233".to_string()),
            },
        )
        .await
        .expect("Failed to update course")
        .expect("Course not found");

        assert_eq!(updated.name, "Databases II");
        assert_eq!(updated.color, "#112233");

        let stored = find_course_by_id(&pool, &course.id)
            .await
            .expect("Failed to fetch course")
            .expect("Course not found");
        assert_eq!(stored.total_classes, 3);
        assert_eq!(stored.attended_classes, 2);
    }

    #[tokio::test]
    async fn test_duplicate_date_hits_unique_index() {
        let pool = setup_test_db().await;

        let course = insert_course(&pool, course_request("Algorithms"))
            .await
            .expect("Failed to insert course");

        let req = NewAttendanceRequest {
            course_id: course.id.clone(),
            date: "2025-01-15".to_string(),
            status: AttendanceStatus::Present,
            notes: None,
        };

        insert_attendance(&pool, &req, "2025-01-15")
            .await
            .expect("First insert should succeed");

        let err = insert_attendance(&pool, &req, "2025-01-15")
            .await
            .expect_err("Second insert should violate the unique index");
        match err {
            sqlx::Error::Database(db) => assert!(db.is_unique_violation()),
            other => panic!("Expected unique violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_counter_delta_is_relative() {
        let pool = setup_test_db().await;

        let course = insert_course(&pool, course_request("Compilers"))
            .await
            .expect("Failed to insert course");

        apply_counter_delta(&pool, &course.id, 1, 1)
            .await
            .expect("Failed to apply delta");
        apply_counter_delta(&pool, &course.id, 1, 0)
            .await
            .expect("Failed to apply delta");
        apply_counter_delta(&pool, &course.id, 0, -1)
            .await
            .expect("Failed to apply delta");

        let stored = find_course_by_id(&pool, &course.id)
            .await
            .expect("Failed to fetch course")
            .expect("Course not found");
        assert_eq!(stored.total_classes, 2);
        assert_eq!(stored.attended_classes, 0);
    }

    #[tokio::test]
    async fn test_attendance_sorted_by_date_descending() {
        let pool = setup_test_db().await;

        let course = insert_course(&pool, course_request("Networks"))
            .await
            .expect("Failed to insert course");

        for date in ["2025-01-10", "2025-01-20", "2025-01-15"] {
            let req = NewAttendanceRequest {
                course_id: course.id.clone(),
                date: date.to_string(),
                status: AttendanceStatus::Present,
                notes: None,
            };
            insert_attendance(&pool, &req, date)
                .await
                .expect("Failed to insert attendance");
        }

        let records = fetch_attendance_for_course(&pool, &course.id)
            .await
            .expect("Failed to fetch attendance");
        let dates: Vec<&str> = records.iter().map(|r| r.date.as_str()).collect();
        assert_eq!(dates, vec!["2025-01-20", "2025-01-15", "2025-01-10"]);
    }
}
