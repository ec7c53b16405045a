use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

/// "course" in the API, but also covers seminars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CourseType {
    Course,
    Seminar,
}

/// One weekly slot, e.g. {"day": "Monday", "startTime": "10:00", "endTime": "12:00"}.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSlot {
    pub day: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub course_type: CourseType,
    pub schedule: Vec<ScheduleSlot>,
    pub min_attendance_percentage: f64,
    pub total_classes: i64,
    pub attended_classes: i64,
    pub color: String,
    pub total_classes_in_semester: Option<i64>,
    pub created_at: String,
}

// Manual FromRow because the schedule column holds JSON text.
impl<'r> sqlx::FromRow<'r, SqliteRow> for Course {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let schedule_json: String = row.try_get("schedule")?;
        let schedule = serde_json::from_str(&schedule_json).map_err(|e| {
            sqlx::Error::ColumnDecode {
                index: "schedule".to_string(),
                source: Box::new(e),
            }
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            course_type: row.try_get("course_type")?,
            schedule,
            min_attendance_percentage: row.try_get("min_attendance_percentage")?,
            total_classes: row.try_get("total_classes")?,
            attended_classes: row.try_get("attended_classes")?,
            color: row.try_get("color")?,
            total_classes_in_semester: row.try_get("total_classes_in_semester")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCourseRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub course_type: CourseType,
    pub schedule: Vec<ScheduleSlot>,
    pub min_attendance_percentage: f64,
    pub color: Option<String>,
    pub total_classes_in_semester: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCourseRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub course_type: Option<CourseType>,
    pub schedule: Option<Vec<ScheduleSlot>>,
    pub min_attendance_percentage: Option<f64>,
    pub color: Option<String>,
}

impl UpdateCourseRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.course_type.is_none()
            && self.schedule.is_none()
            && self.min_attendance_percentage.is_none()
            && self.color.is_none()
    }
}
