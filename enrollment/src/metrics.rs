//! Enrollment metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! host process installs a recorder.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `enrollment_transitions_total{operation,outcome}` - Transitions by
//!   operation (`enroll`, `cancel_enrollment`, `join_wait`, `cancel_wait`) and
//!   outcome (`accepted`, `unknown_user` or the rejection kind)
//! - `enrollment_promotions_total` - Users promoted from a wait queue
//!
//! ## Histograms
//! - `enrollment_wait_duration_seconds{outcome}` - Time spent in a wait queue,
//!   recorded on promotion and on withdrawal

use crate::error::EnrollmentError;
use metrics::{describe_counter, describe_histogram};
use std::time::Duration;

/// Describe every enrollment metric.
///
/// Call once at startup, before any metric is recorded.
pub fn register_enrollment_metrics() {
    describe_counter!(
        "enrollment_transitions_total",
        "Total number of enrollment transitions by operation and outcome"
    );
    describe_counter!(
        "enrollment_promotions_total",
        "Total number of users promoted from a wait queue"
    );
    describe_histogram!(
        "enrollment_wait_duration_seconds",
        "Time spent in a wait queue before promotion or withdrawal"
    );

    tracing::info!("Enrollment metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record an accepted transition
pub fn record_accepted(operation: &'static str) {
    metrics::counter!("enrollment_transitions_total", "operation" => operation, "outcome" => "accepted")
        .increment(1);
}

/// Record a refused transition
pub fn record_rejected(operation: &'static str, error: &EnrollmentError) {
    metrics::counter!(
        "enrollment_transitions_total",
        "operation" => operation,
        "outcome" => rejection_label(error)
    )
    .increment(1);
}

/// Record a transition attempted by an unregistered user
pub fn record_unknown_user(operation: &'static str) {
    metrics::counter!("enrollment_transitions_total", "operation" => operation, "outcome" => "unknown_user")
        .increment(1);
}

/// Record a promotion and how long the promoted user waited
pub fn record_promotion(waited: Duration) {
    metrics::counter!("enrollment_promotions_total").increment(1);
    metrics::histogram!("enrollment_wait_duration_seconds", "outcome" => "promoted")
        .record(waited.as_secs_f64());
}

/// Record a withdrawal from a wait queue
pub fn record_wait_cancelled(waited: Duration) {
    metrics::histogram!("enrollment_wait_duration_seconds", "outcome" => "cancelled")
        .record(waited.as_secs_f64());
}

/// Label value for a rejection kind
#[must_use]
pub const fn rejection_label(error: &EnrollmentError) -> &'static str {
    match error {
        EnrollmentError::CapacityExceeded { .. } => "capacity_exceeded",
        EnrollmentError::CapacityAvailable { .. } => "capacity_available",
        EnrollmentError::AlreadyInvolved { .. } => "already_involved",
        EnrollmentError::NotEnrolled { .. } => "not_enrolled",
        EnrollmentError::NotWaiting { .. } => "not_waiting",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventId;

    #[test]
    fn test_rejection_labels_are_distinct() {
        let event = EventId::new();
        let user = crate::types::UserId::new();
        let labels = [
            rejection_label(&EnrollmentError::CapacityExceeded { event, capacity: 1 }),
            rejection_label(&EnrollmentError::CapacityAvailable { event }),
            rejection_label(&EnrollmentError::AlreadyInvolved {
                user,
                event,
                involvement: crate::types::Involvement::Waiting,
            }),
            rejection_label(&EnrollmentError::NotEnrolled { user, event }),
            rejection_label(&EnrollmentError::NotWaiting { user, event }),
        ];

        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }

    #[test]
    fn test_recording_without_recorder_is_a_no_op() {
        register_enrollment_metrics();
        record_accepted("enroll");
        record_unknown_user("join_wait");
        record_promotion(Duration::from_secs(3));
        record_wait_cancelled(Duration::ZERO);
    }
}
