use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    /// Percent of lectures (1-100) that must be viewed for completion.
    pub completion_threshold: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub guardian_name: Option<String>,
    pub custom_student_id: String,
    pub created_at: DateTime<Utc>,
}

/// The ProgressRecord row for one (student, course) enrollment.
#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct CourseProgress {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-lecture watch state, as returned to the playback client.
#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LectureProgress {
    pub lecture_id: Uuid,
    pub viewed: bool,
    pub viewed_at: Option<DateTime<Utc>>,
    pub progress_percentage: f64,
}

/// A row from `certificate_approvals`: the eligibility record plus the
/// snapshot frozen at approval time and the minted certificate identity.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct CertificateApproval {
    pub id: Uuid,
    pub course_id: Uuid,
    pub student_id: Uuid,
    pub approved_by: Uuid,
    pub approved_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub grade: Option<String>,
    pub notes: Option<String>,
    pub snapshot_version: i32,
    pub student_name: String,
    pub student_email: String,
    pub guardian_name: Option<String>,
    pub custom_student_id: String,
    pub course_title: String,
    pub certificate_id: Option<String>,
    pub certificate_issued_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable certificate view derived from an approval row once a
/// certificate id has been minted. Everything here comes from the snapshot.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub certificate_id: String,
    pub approval_id: Uuid,
    pub student_id: Uuid,
    pub student_name: String,
    pub guardian_name: Option<String>,
    pub custom_student_id: String,
    pub course_title: String,
    pub grade: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub revoked: bool,
}

// --- request bodies ---

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LectureViewedReq {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub lecture_id: Uuid,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackProgressReq {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub lecture_id: Uuid,
    pub percentage: f64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResetProgressReq {
    pub student_id: Uuid,
    pub course_id: Uuid,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApproveReq {
    pub course_id: Uuid,
    pub student_id: Uuid,
    pub approver_id: Uuid,
    pub grade: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RevokeReq {
    pub course_id: Uuid,
    pub student_id: Uuid,
    pub reason: Option<String>,
}

// --- response bodies ---

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub lectures: Vec<LectureProgress>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    pub course_id: Uuid,
    pub student_id: Uuid,
    pub approved_by: Uuid,
    pub approved_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub grade: Option<String>,
    pub notes: Option<String>,
    pub certificate_id: Option<String>,
}

impl From<CertificateApproval> for ApprovalResponse {
    fn from(a: CertificateApproval) -> Self {
        Self {
            course_id: a.course_id,
            student_id: a.student_id,
            approved_by: a.approved_by,
            approved_at: a.approved_at,
            revoked: a.revoked,
            revoked_at: a.revoked_at,
            grade: a.grade,
            notes: a.notes,
            certificate_id: a.certificate_id,
        }
    }
}

/// Public verification payload. Built from the approval snapshot only, never
/// from live student or course rows.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub certificate_id: String,
    pub student_id: Uuid,
    pub student_name: String,
    pub student_father_name: Option<String>,
    pub course_title: String,
    pub grade: Option<String>,
    pub issue_date: DateTime<Utc>,
    pub issued_by: String,
    pub revoked: bool,
    pub verified: bool,
}
