// Minting: first render of an approval generates its certificate identity;
// every later render reuses it. The identifier is a random token so the
// public verification endpoint cannot be enumerated.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rand::RngCore;
use std::fmt::Write as _;

use crate::models::{Certificate, CertificateApproval};

/// 16 random bytes, hex-encoded: 128 bits keeps collisions negligible at any
/// plausible certificate volume.
const CERTIFICATE_ID_BYTES: usize = 16;

pub fn new_certificate_id() -> String {
    let mut buf = [0u8; CERTIFICATE_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    let mut id = String::with_capacity(CERTIFICATE_ID_BYTES * 2);
    for b in buf {
        let _ = write!(id, "{b:02x}");
    }
    id
}

/// Issuance timestamp rule: the course completion date when there is one,
/// otherwise the moment of minting (approval can precede completion).
pub fn issue_date(completed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    completed_at.unwrap_or(now)
}

/// Project the immutable certificate view out of an approval row. `None`
/// until an id has been minted.
pub fn from_approval(approval: &CertificateApproval) -> Option<Certificate> {
    let certificate_id = approval.certificate_id.clone()?;
    Some(Certificate {
        certificate_id,
        approval_id: approval.id,
        student_id: approval.student_id,
        student_name: approval.student_name.clone(),
        guardian_name: approval.guardian_name.clone(),
        custom_student_id: approval.custom_student_id.clone(),
        course_title: approval.course_title.clone(),
        grade: approval.grade.clone(),
        issued_at: approval.certificate_issued_at.unwrap_or(approval.approved_at),
        revoked: approval.revoked,
    })
}

/// `Content-Disposition` value for the download: an ASCII fallback filename
/// plus the RFC 5987 `filename*` form carrying the real names.
pub fn content_disposition(student_name: &str, course_title: &str) -> String {
    let ascii = format!("certificate-{}-{}.pdf", slug(student_name), slug(course_title));
    let pretty = format!("{student_name} - {course_title}.pdf");
    let encoded = utf8_percent_encode(&pretty, NON_ALPHANUMERIC);
    format!("attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}

fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_dash = true;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("certificate");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::SNAPSHOT_VERSION;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn approval() -> CertificateApproval {
        CertificateApproval {
            id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            approved_by: Uuid::new_v4(),
            approved_at: t(0),
            revoked: false,
            revoked_at: None,
            grade: Some("A".into()),
            notes: None,
            snapshot_version: SNAPSHOT_VERSION,
            student_name: "Ada Lovelace".into(),
            student_email: "ada@example.org".into(),
            guardian_name: None,
            custom_student_id: "STU-0042".into(),
            course_title: "Analytical Engines 101".into(),
            certificate_id: None,
            certificate_issued_at: None,
            created_at: t(0),
            updated_at: t(0),
        }
    }

    #[test]
    fn token_is_32_lowercase_hex_chars() {
        let id = new_certificate_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn tokens_do_not_repeat() {
        let a = new_certificate_id();
        let b = new_certificate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn issue_date_prefers_completion() {
        assert_eq!(issue_date(Some(t(100)), t(500)), t(100));
        assert_eq!(issue_date(None, t(500)), t(500));
    }

    #[test]
    fn no_view_before_minting() {
        assert!(from_approval(&approval()).is_none());
    }

    #[test]
    fn view_reuses_minted_identity_across_revocation() {
        let mut a = approval();
        a.certificate_id = Some("deadbeefdeadbeefdeadbeefdeadbeef".into());
        a.certificate_issued_at = Some(t(50));

        let first = from_approval(&a).unwrap();
        assert_eq!(first.certificate_id, "deadbeefdeadbeefdeadbeefdeadbeef");
        assert_eq!(first.issued_at, t(50));
        assert!(!first.revoked);

        // revoke + re-approve never re-mints
        a.revoked = true;
        let revoked = from_approval(&a).unwrap();
        assert_eq!(revoked.certificate_id, first.certificate_id);
        assert!(revoked.revoked);

        a.revoked = false;
        let again = from_approval(&a).unwrap();
        assert_eq!(again.certificate_id, first.certificate_id);
        assert!(!again.revoked);
    }

    #[test]
    fn disposition_has_ascii_and_utf8_forms() {
        let cd = content_disposition("Grace Hopper", "Compilers & Codebreaking");
        assert!(cd.starts_with("attachment; filename=\"certificate-grace-hopper-compilers-codebreaking.pdf\""));
        assert!(cd.contains("filename*=UTF-8''"));
        // the 5987 form percent-encodes spaces and the ampersand
        assert!(cd.contains("%20"));
        assert!(cd.contains("%26"));
    }

    #[test]
    fn slug_never_empty() {
        assert_eq!(slug("***"), "certificate");
        assert_eq!(slug("  Ada   Lovelace  "), "ada-lovelace");
    }
}
