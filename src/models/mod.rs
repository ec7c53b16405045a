pub mod attendance;
pub mod course;

pub use attendance::{
    AbsenceWithCourse, AttendanceRecord, AttendanceStatus, NewAttendanceRequest,
    UpdateAttendanceRequest,
};
pub use course::{Course, CourseType, NewCourseRequest, ScheduleSlot, UpdateCourseRequest};
