use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use http::header;
use sqlx::{Postgres, Transaction};
use std::env;
use uuid::Uuid;

use crate::db::Db;
use crate::error::{is_unique_violation, Error, Result};
use crate::models::*;
use crate::{certificate, eligibility, pdf, progress};

pub fn router(db: Db) -> Router {
    Router::new()
        // playback client
        .route("/api/progress/viewed", post(lecture_viewed))
        .route("/api/progress/playback", post(playback_progress))
        .route("/api/progress/reset", post(reset_progress))
        .route("/api/progress/:course_id/:student_id", get(get_progress))
        // approval authority
        .route("/api/certificates/approve", post(approve_certificate))
        .route("/api/certificates/revoke", post(revoke_certificate))
        // download client
        .route(
            "/api/certificates/:course_id/:student_id/download",
            get(download_certificate),
        )
        // public verifier (no auth)
        .route("/api/verify-certificate/:certificate_id", get(verify_certificate))
        .with_state(db)
}

// --- progress store ---

enum LectureEvent {
    Viewed,
    Playback(f64),
}

async fn lecture_viewed(
    State(db): State<Db>,
    Json(req): Json<LectureViewedReq>,
) -> Result<Json<ProgressResponse>> {
    let resp =
        update_lecture(&db, req.student_id, req.course_id, req.lecture_id, LectureEvent::Viewed)
            .await?;
    Ok(Json(resp))
}

async fn playback_progress(
    State(db): State<Db>,
    Json(req): Json<PlaybackProgressReq>,
) -> Result<Json<ProgressResponse>> {
    let percentage = progress::clamp_percentage(req.percentage)?;
    let resp = update_lecture(
        &db,
        req.student_id,
        req.course_id,
        req.lecture_id,
        LectureEvent::Playback(percentage),
    )
    .await?;
    Ok(Json(resp))
}

/// Shared write path for both entry points, so the explicit and the
/// percentage-promoted roads run through one transition + one recompute.
async fn update_lecture(
    db: &Db,
    student_id: Uuid,
    course_id: Uuid,
    lecture_id: Uuid,
    event: LectureEvent,
) -> Result<ProgressResponse> {
    let course = fetch_course(db, course_id).await?;
    progress::validate_threshold(course.completion_threshold)?;
    let total = count_lectures(db, course_id).await?;
    if total == 0 {
        return Err(Error::CourseNotFound);
    }
    let in_course = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM lectures WHERE id=$1 AND course_id=$2)",
    )
    .bind(lecture_id)
    .bind(course_id)
    .fetch_one(db)
    .await?;
    if !in_course {
        return Err(Error::NotFound("lecture"));
    }

    let mut tx = db.begin().await?;

    // One writer per enrollment: the locked progress row serializes the
    // lecture write with the course-level recompute.
    sqlx::query(
        "INSERT INTO course_progress (student_id, course_id) VALUES ($1,$2) \
         ON CONFLICT (student_id, course_id) DO NOTHING",
    )
    .bind(student_id)
    .bind(course_id)
    .execute(&mut *tx)
    .await?;
    let prog = sqlx::query_as::<_, CourseProgress>(
        "SELECT student_id, course_id, completed, completed_at, created_at, updated_at \
         FROM course_progress WHERE student_id=$1 AND course_id=$2 FOR UPDATE",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(&mut *tx)
    .await?;

    let existing = sqlx::query_as::<_, LectureProgress>(
        "SELECT lecture_id, viewed, viewed_at, progress_percentage FROM lecture_progress \
         WHERE student_id=$1 AND course_id=$2 AND lecture_id=$3",
    )
    .bind(student_id)
    .bind(course_id)
    .bind(lecture_id)
    .fetch_optional(&mut *tx)
    .await?;

    let mut state = match &existing {
        Some(row) => progress::LectureState {
            viewed: row.viewed,
            viewed_at: row.viewed_at,
            progress_percentage: row.progress_percentage,
        },
        None => progress::LectureState::default(),
    };
    let now = Utc::now();
    let changed = match event {
        LectureEvent::Viewed => progress::apply_view(&mut state, now),
        LectureEvent::Playback(p) => {
            progress::apply_playback(&mut state, p, course.completion_threshold, now)
        }
    };

    if changed {
        sqlx::query(
            "INSERT INTO lecture_progress \
             (student_id, course_id, lecture_id, viewed, viewed_at, progress_percentage) \
             VALUES ($1,$2,$3,$4,$5,$6) \
             ON CONFLICT (student_id, course_id, lecture_id) DO UPDATE SET \
             viewed=EXCLUDED.viewed, viewed_at=EXCLUDED.viewed_at, \
             progress_percentage=EXCLUDED.progress_percentage, updated_at=now()",
        )
        .bind(student_id)
        .bind(course_id)
        .bind(lecture_id)
        .bind(state.viewed)
        .bind(state.viewed_at)
        .bind(state.progress_percentage)
        .execute(&mut *tx)
        .await?;

        let viewed_count = sqlx::query_scalar::<_, i64>(
            "SELECT count(*) FROM lecture_progress \
             WHERE student_id=$1 AND course_id=$2 AND viewed",
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_one(&mut *tx)
        .await?;

        let (completed, completed_at) = progress::recompute_completion(
            prog.completed,
            prog.completed_at,
            viewed_count,
            total,
            course.completion_threshold,
            now,
        );
        sqlx::query(
            "UPDATE course_progress SET completed=$3, completed_at=$4, updated_at=now() \
             WHERE student_id=$1 AND course_id=$2",
        )
        .bind(student_id)
        .bind(course_id)
        .bind(completed)
        .bind(completed_at)
        .execute(&mut *tx)
        .await?;

        if completed && !prog.completed {
            tracing::info!(%student_id, %course_id, "course completed");
        }
    }

    let resp = progress_response(&mut tx, student_id, course_id).await?;
    tx.commit().await?;
    Ok(resp)
}

async fn reset_progress(
    State(db): State<Db>,
    Json(req): Json<ResetProgressReq>,
) -> Result<Json<ProgressResponse>> {
    let mut tx = db.begin().await?;
    sqlx::query_as::<_, CourseProgress>(
        "SELECT student_id, course_id, completed, completed_at, created_at, updated_at \
         FROM course_progress WHERE student_id=$1 AND course_id=$2 FOR UPDATE",
    )
    .bind(req.student_id)
    .bind(req.course_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(Error::NotFound("progress record"))?;

    sqlx::query("DELETE FROM lecture_progress WHERE student_id=$1 AND course_id=$2")
        .bind(req.student_id)
        .bind(req.course_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "UPDATE course_progress SET completed=false, completed_at=NULL, updated_at=now() \
         WHERE student_id=$1 AND course_id=$2",
    )
    .bind(req.student_id)
    .bind(req.course_id)
    .execute(&mut *tx)
    .await?;

    let resp = progress_response(&mut tx, req.student_id, req.course_id).await?;
    tx.commit().await?;
    tracing::info!(student_id=%req.student_id, course_id=%req.course_id, "progress reset");
    Ok(Json(resp))
}

async fn get_progress(
    State(db): State<Db>,
    Path((course_id, student_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ProgressResponse>> {
    let prog = sqlx::query_as::<_, CourseProgress>(
        "SELECT student_id, course_id, completed, completed_at, created_at, updated_at \
         FROM course_progress WHERE student_id=$1 AND course_id=$2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(&db)
    .await?
    .ok_or(Error::NotFound("progress record"))?;
    let lectures = fetch_lectures(&db, student_id, course_id).await?;
    Ok(Json(ProgressResponse {
        student_id: prog.student_id,
        course_id: prog.course_id,
        completed: prog.completed,
        completed_at: prog.completed_at,
        lectures,
    }))
}

async fn progress_response(
    tx: &mut Transaction<'_, Postgres>,
    student_id: Uuid,
    course_id: Uuid,
) -> Result<ProgressResponse> {
    let prog = sqlx::query_as::<_, CourseProgress>(
        "SELECT student_id, course_id, completed, completed_at, created_at, updated_at \
         FROM course_progress WHERE student_id=$1 AND course_id=$2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(&mut **tx)
    .await?;
    let lectures = sqlx::query_as::<_, LectureProgress>(
        "SELECT lecture_id, viewed, viewed_at, progress_percentage FROM lecture_progress \
         WHERE student_id=$1 AND course_id=$2 ORDER BY created_at, lecture_id",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(ProgressResponse {
        student_id: prog.student_id,
        course_id: prog.course_id,
        completed: prog.completed,
        completed_at: prog.completed_at,
        lectures,
    })
}

// --- eligibility gate ---

const APPROVE_SQL: &str = "\
INSERT INTO certificate_approvals \
    (course_id, student_id, approved_by, approved_at, revoked, revoked_at, grade, notes, \
     snapshot_version, student_name, student_email, guardian_name, custom_student_id, course_title) \
VALUES ($1, $2, $3, now(), false, NULL, $4, $5, $6, $7, $8, $9, $10, $11) \
ON CONFLICT (course_id, student_id) DO UPDATE SET \
    approved_by = EXCLUDED.approved_by, \
    approved_at = now(), \
    revoked = false, \
    revoked_at = NULL, \
    grade = EXCLUDED.grade, \
    notes = EXCLUDED.notes, \
    snapshot_version = EXCLUDED.snapshot_version, \
    student_name = EXCLUDED.student_name, \
    student_email = EXCLUDED.student_email, \
    guardian_name = EXCLUDED.guardian_name, \
    custom_student_id = EXCLUDED.custom_student_id, \
    course_title = EXCLUDED.course_title, \
    updated_at = now() \
RETURNING *";

async fn approve_certificate(
    State(db): State<Db>,
    Json(req): Json<ApproveReq>,
) -> Result<Json<ApprovalResponse>> {
    let student = fetch_student(&db, req.student_id).await?;
    let course = fetch_course(&db, req.course_id).await?;
    // fresh snapshot on every approval; the minted certificate_id column is
    // deliberately absent from the upsert and survives re-approval
    let snap = eligibility::Snapshot::capture(&student, &course);

    let row = match sqlx::query_as::<_, CertificateApproval>(APPROVE_SQL)
        .bind(req.course_id)
        .bind(req.student_id)
        .bind(req.approver_id)
        .bind(req.grade.as_deref())
        .bind(req.notes.as_deref())
        .bind(snap.version)
        .bind(&snap.student_name)
        .bind(&snap.student_email)
        .bind(snap.guardian_name.as_deref())
        .bind(&snap.custom_student_id)
        .bind(&snap.course_title)
        .fetch_one(&db)
        .await
    {
        Ok(row) => row,
        // concurrent approvals collapse to one record; return the winner
        Err(e) if is_unique_violation(&e) => fetch_approval(&db, req.course_id, req.student_id)
            .await?
            .ok_or(Error::NotFound("approval"))?,
        Err(e) => return Err(e.into()),
    };

    tracing::info!(
        course_id=%req.course_id,
        student_id=%req.student_id,
        approved_by=%req.approver_id,
        "certificate approved"
    );
    Ok(Json(row.into()))
}

async fn revoke_certificate(
    State(db): State<Db>,
    Json(req): Json<RevokeReq>,
) -> Result<Json<serde_json::Value>> {
    let mut tx = db.begin().await?;
    let existing = sqlx::query_as::<_, CertificateApproval>(
        "SELECT * FROM certificate_approvals WHERE course_id=$1 AND student_id=$2 FOR UPDATE",
    )
    .bind(req.course_id)
    .bind(req.student_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = existing else {
        // nothing to revoke: idempotent no-op
        return Ok(Json(serde_json::json!({ "ok": true, "revoked": false })));
    };

    let notes = eligibility::append_reason(row.notes, req.reason.as_deref());
    sqlx::query(
        "UPDATE certificate_approvals SET revoked=true, revoked_at=now(), notes=$3, \
         updated_at=now() WHERE course_id=$1 AND student_id=$2",
    )
    .bind(req.course_id)
    .bind(req.student_id)
    .bind(notes)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(course_id=%req.course_id, student_id=%req.student_id, "certificate revoked");
    Ok(Json(serde_json::json!({ "ok": true, "revoked": true })))
}

// --- certificate minter + document download ---

/// Idempotent issuance: the first caller mints the identifier, everyone
/// after (and every re-download) gets the same certificate back.
async fn mint_certificate(db: &Db, course_id: Uuid, student_id: Uuid) -> Result<Certificate> {
    let approval = fetch_approval(db, course_id, student_id)
        .await?
        .ok_or(Error::NotEligible)?;
    if !eligibility::is_active(&approval) {
        return Err(Error::NotEligible);
    }
    if let Some(cert) = certificate::from_approval(&approval) {
        return Ok(cert);
    }

    // issuance date prefers the completion date of the enrollment
    let completed_at = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
        "SELECT completed_at FROM course_progress WHERE student_id=$1 AND course_id=$2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(db)
    .await?
    .flatten();
    let issued_at = certificate::issue_date(completed_at, Utc::now());

    // first writer wins on the NULL certificate_id; a retry covers the
    // (vanishingly unlikely) token collision on the unique index
    for _ in 0..2 {
        let certificate_id = certificate::new_certificate_id();
        let minted = sqlx::query_as::<_, CertificateApproval>(
            "UPDATE certificate_approvals SET certificate_id=$3, certificate_issued_at=$4, \
             updated_at=now() \
             WHERE course_id=$1 AND student_id=$2 AND certificate_id IS NULL AND NOT revoked \
             RETURNING *",
        )
        .bind(course_id)
        .bind(student_id)
        .bind(&certificate_id)
        .bind(issued_at)
        .fetch_optional(db)
        .await;
        match minted {
            Ok(Some(row)) => {
                tracing::info!(%course_id, %student_id, %certificate_id, "certificate minted");
                return certificate::from_approval(&row).ok_or(Error::NotEligible);
            }
            Ok(None) => break,
            Err(e) if is_unique_violation(&e) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    // lost the race: observe and return the winner's record
    let row = fetch_approval(db, course_id, student_id)
        .await?
        .ok_or(Error::NotEligible)?;
    if !eligibility::is_active(&row) {
        return Err(Error::NotEligible);
    }
    certificate::from_approval(&row).ok_or(Error::NotEligible)
}

async fn download_certificate(
    State(db): State<Db>,
    Path((course_id, student_id)): Path<(Uuid, Uuid)>,
) -> Result<Response> {
    let cert = mint_certificate(&db, course_id, student_id).await?;
    let config = render_config_from_env();
    let bytes = pdf::render(&cert, &config);
    let disposition = certificate::content_disposition(&cert.student_name, &cert.course_title);
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

fn render_config_from_env() -> pdf::RenderConfig {
    let template = env::var("CERTIFICATE_TEMPLATE").ok().and_then(|path| {
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(error=%e, path=%path, "template unreadable; using plain background");
                None
            }
        }
    });
    pdf::RenderConfig {
        institute_name: institute_name(),
        frontend_base_url: env::var("FRONTEND_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into()),
        template,
    }
}

fn institute_name() -> String {
    env::var("INSTITUTE_NAME").unwrap_or_else(|_| "Course Academy".into())
}

// --- public verification ---

async fn verify_certificate(
    State(db): State<Db>,
    Path(certificate_id): Path<String>,
) -> Result<Json<VerificationResponse>> {
    // snapshot fields only; live student/course rows are never consulted
    let row = sqlx::query_as::<_, CertificateApproval>(
        "SELECT * FROM certificate_approvals WHERE certificate_id=$1",
    )
    .bind(&certificate_id)
    .fetch_optional(&db)
    .await?
    .ok_or(Error::NotFound("certificate"))?;

    Ok(Json(VerificationResponse {
        certificate_id,
        student_id: row.student_id,
        student_name: row.student_name,
        student_father_name: row.guardian_name,
        course_title: row.course_title,
        grade: row.grade,
        issue_date: row.certificate_issued_at.unwrap_or(row.approved_at),
        issued_by: institute_name(),
        revoked: row.revoked,
        verified: true,
    }))
}

// --- shared lookups ---

async fn fetch_course(db: &Db, id: Uuid) -> Result<Course> {
    sqlx::query_as::<_, Course>(
        "SELECT id, title, completion_threshold, created_at FROM courses WHERE id=$1",
    )
    .bind(id)
    .fetch_optional(db)
    .await?
    .ok_or(Error::NotFound("course"))
}

async fn fetch_student(db: &Db, id: Uuid) -> Result<Student> {
    sqlx::query_as::<_, Student>(
        "SELECT id, name, email, guardian_name, custom_student_id, created_at \
         FROM students WHERE id=$1",
    )
    .bind(id)
    .fetch_optional(db)
    .await?
    .ok_or(Error::NotFound("student"))
}

async fn fetch_approval(
    db: &Db,
    course_id: Uuid,
    student_id: Uuid,
) -> Result<Option<CertificateApproval>> {
    Ok(sqlx::query_as::<_, CertificateApproval>(
        "SELECT * FROM certificate_approvals WHERE course_id=$1 AND student_id=$2",
    )
    .bind(course_id)
    .bind(student_id)
    .fetch_optional(db)
    .await?)
}

async fn count_lectures(db: &Db, course_id: Uuid) -> Result<i64> {
    Ok(
        sqlx::query_scalar::<_, i64>("SELECT count(*) FROM lectures WHERE course_id=$1")
            .bind(course_id)
            .fetch_one(db)
            .await?,
    )
}

async fn fetch_lectures(db: &Db, student_id: Uuid, course_id: Uuid) -> Result<Vec<LectureProgress>> {
    Ok(sqlx::query_as::<_, LectureProgress>(
        "SELECT lecture_id, viewed, viewed_at, progress_percentage FROM lecture_progress \
         WHERE student_id=$1 AND course_id=$2 ORDER BY created_at, lecture_id",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_all(db)
    .await?)
}
