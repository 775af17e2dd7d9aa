// Completion derivation for one (student, course) enrollment.
//
// Handlers load the stored row, apply one of these transitions, and write the
// result back inside the same transaction that recomputes the course-level
// verdict, so "viewed" promotion and `completed` are always observed together.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Mutable watch state for a single lecture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LectureState {
    pub viewed: bool,
    pub viewed_at: Option<DateTime<Utc>>,
    pub progress_percentage: f64,
}

/// Explicit "mark viewed" transition. Idempotent: a lecture that is already
/// viewed is left untouched (`viewed_at` keeps its original stamp) and the
/// caller skips the write entirely.
pub fn apply_view(state: &mut LectureState, now: DateTime<Utc>) -> bool {
    if state.viewed {
        return false;
    }
    state.viewed = true;
    state.viewed_at = Some(now);
    if state.progress_percentage < 100.0 {
        state.progress_percentage = 100.0;
    }
    true
}

/// Continuous playback transition. Percentages only move forward; once the
/// lecture crosses the course threshold it is promoted to viewed, which is
/// the same completion signal the explicit path produces.
pub fn apply_playback(
    state: &mut LectureState,
    percentage: f64,
    threshold: i32,
    now: DateTime<Utc>,
) -> bool {
    let mut changed = false;
    if percentage > state.progress_percentage {
        state.progress_percentage = percentage;
        changed = true;
    }
    if !state.viewed && state.progress_percentage >= f64::from(threshold) {
        state.viewed = true;
        state.viewed_at = Some(now);
        changed = true;
    }
    changed
}

/// Course-level verdict: viewed fraction meets the threshold. Integer
/// arithmetic so 3/4 at 75% is exactly complete, never a float hair short.
pub fn is_completed(viewed_count: i64, total_lectures: i64, threshold: i32) -> bool {
    total_lectures > 0 && viewed_count * 100 >= total_lectures * i64::from(threshold)
}

/// Recompute `(completed, completed_at)` after a lecture write. The stamp is
/// set exactly once, on the false-to-true transition; an already-complete
/// record keeps its original stamp.
pub fn recompute_completion(
    was_completed: bool,
    completed_at: Option<DateTime<Utc>>,
    viewed_count: i64,
    total_lectures: i64,
    threshold: i32,
    now: DateTime<Utc>,
) -> (bool, Option<DateTime<Utc>>) {
    let done = is_completed(viewed_count, total_lectures, threshold);
    match (was_completed, done) {
        (false, true) => (true, Some(now)),
        (true, true) => (true, completed_at),
        (_, false) => (false, None),
    }
}

/// Reject non-finite playback input before any write; finite out-of-range
/// values are clamped into 0..=100.
pub fn clamp_percentage(percentage: f64) -> Result<f64> {
    if !percentage.is_finite() {
        return Err(Error::Validation("percentage must be a finite number".into()));
    }
    Ok(percentage.clamp(0.0, 100.0))
}

pub fn validate_threshold(threshold: i32) -> Result<()> {
    if (1..=100).contains(&threshold) {
        return Ok(());
    }
    Err(Error::Validation(format!(
        "completion threshold must be within 1..=100, got {threshold}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn mark_viewed_is_idempotent_and_keeps_first_stamp() {
        let mut state = LectureState::default();
        assert!(apply_view(&mut state, t(0)));
        assert!(state.viewed);
        assert_eq!(state.viewed_at, Some(t(0)));
        assert_eq!(state.progress_percentage, 100.0);

        let before = state.clone();
        assert!(!apply_view(&mut state, t(60)));
        assert_eq!(state, before);
    }

    #[test]
    fn playback_moves_forward_only() {
        let mut state = LectureState::default();
        assert!(apply_playback(&mut state, 40.0, 95, t(0)));
        assert_eq!(state.progress_percentage, 40.0);
        assert!(!state.viewed);

        // regressions are ignored
        assert!(!apply_playback(&mut state, 10.0, 95, t(1)));
        assert_eq!(state.progress_percentage, 40.0);
    }

    #[test]
    fn playback_promotes_to_viewed_at_threshold() {
        let mut state = LectureState::default();
        assert!(apply_playback(&mut state, 95.0, 95, t(7)));
        assert!(state.viewed);
        assert_eq!(state.viewed_at, Some(t(7)));
        // percentage stays what playback reported, not pinned to 100
        assert_eq!(state.progress_percentage, 95.0);
    }

    #[test]
    fn explicit_and_promoted_paths_converge_on_viewed() {
        let mut explicit = LectureState::default();
        apply_view(&mut explicit, t(0));

        let mut promoted = LectureState::default();
        apply_playback(&mut promoted, 96.0, 95, t(0));

        assert_eq!(explicit.viewed, promoted.viewed);
        // and therefore the same course verdict for equal lecture counts
        assert_eq!(
            is_completed(1, 1, 95),
            is_completed(i64::from(promoted.viewed), 1, 95)
        );
    }

    #[test]
    fn threshold_boundary_three_of_four_at_75() {
        assert!(!is_completed(2, 4, 75));
        assert!(is_completed(3, 4, 75));
        assert!(is_completed(4, 4, 75));
    }

    #[test]
    fn default_threshold_needs_19_of_20() {
        assert!(!is_completed(18, 20, 95));
        assert!(is_completed(19, 20, 95));
    }

    #[test]
    fn empty_curriculum_is_never_complete() {
        assert!(!is_completed(0, 0, 95));
    }

    #[test]
    fn completed_at_set_once_on_transition() {
        let (done, at) = recompute_completion(false, None, 3, 4, 75, t(10));
        assert!(done);
        assert_eq!(at, Some(t(10)));

        // further writes keep the original stamp
        let (done, at) = recompute_completion(true, Some(t(10)), 4, 4, 75, t(99));
        assert!(done);
        assert_eq!(at, Some(t(10)));
    }

    #[test]
    fn incomplete_clears_stamp() {
        let (done, at) = recompute_completion(true, Some(t(10)), 0, 4, 75, t(99));
        assert!(!done);
        assert_eq!(at, None);
    }

    #[test]
    fn percentage_clamps_but_rejects_non_finite() {
        assert_eq!(clamp_percentage(150.0).unwrap(), 100.0);
        assert_eq!(clamp_percentage(-3.0).unwrap(), 0.0);
        assert_eq!(clamp_percentage(42.5).unwrap(), 42.5);
        assert!(clamp_percentage(f64::NAN).is_err());
        assert!(clamp_percentage(f64::INFINITY).is_err());
    }

    #[test]
    fn threshold_range_enforced() {
        assert!(validate_threshold(1).is_ok());
        assert!(validate_threshold(100).is_ok());
        assert!(validate_threshold(0).is_err());
        assert!(validate_threshold(101).is_err());
    }
}
