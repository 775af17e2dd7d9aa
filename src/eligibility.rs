// Approval gate: the record that must exist (and not be revoked) before a
// certificate can be minted. Approval is an administrative decision layered
// on top of progress, not derived from it.

use crate::models::{CertificateApproval, Course, Student};

/// Bump when snapshot columns change shape, so already-issued certificates
/// can be read back under the schema they were written with.
pub const SNAPSHOT_VERSION: i32 = 1;

/// Point-in-time copy of the mutable student/course fields, frozen at
/// approval time. Verification and rendering read this and only this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub version: i32,
    pub student_name: String,
    pub student_email: String,
    pub guardian_name: Option<String>,
    pub custom_student_id: String,
    pub course_title: String,
}

impl Snapshot {
    pub fn capture(student: &Student, course: &Course) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            student_name: student.name.clone(),
            student_email: student.email.clone(),
            guardian_name: student.guardian_name.clone(),
            custom_student_id: student.custom_student_id.clone(),
            course_title: course.title.clone(),
        }
    }
}

/// True iff the approval currently authorizes issuance and verification.
pub fn is_active(approval: &CertificateApproval) -> bool {
    !approval.revoked
}

/// Fold a revocation reason into the audit notes. `None` leaves the notes
/// untouched; repeated revocations append, never overwrite.
pub fn append_reason(notes: Option<String>, reason: Option<&str>) -> Option<String> {
    let reason = match reason.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return notes,
    };
    let line = format!("revoked: {reason}");
    Some(match notes {
        Some(existing) if !existing.is_empty() => format!("{existing}\n{line}"),
        _ => line,
    })
}
