//! Per-event enrollment runtime.
//!
//! [`EnrollmentEngine`] is the capability callers use to drive one event's
//! state machine. [`EventEngine`] implements it with a mutex around the
//! event's [`EnrollmentState`]: at most one transition is in flight per event,
//! while engines for different events never contend.
//!
//! # Transition pipeline
//!
//! Under the event lock, every transition:
//!
//! 1. asks the reducer to decide (no mutation)
//! 2. applies the matching membership changes as a batch
//! 3. folds the decided events into the event state
//!
//! A user the membership registry does not know is turned away with
//! [`EngineError::UnknownUser`] before step 1.
//! A refusal in step 1 returns the [`EnrollmentError`](crate::EnrollmentError)
//! with nothing touched.
//! A failure in step 2 means the membership side drifted from the event side;
//! the batch is rolled back, the violation is logged and the call panics
//! before step 3, so neither side ever shows a half-applied transition.

use crate::aggregates::{
    EnrollmentCommand, EnrollmentEnvironment, EnrollmentEvent, EnrollmentReducer, EnrollmentSnapshot,
    EnrollmentState, WaitStats,
};
use crate::error::{EngineError, TransitionError};
use crate::membership::{MembershipChange, MembershipRegistry};
use crate::metrics;
use crate::types::{Event, EventId, UserId};
use enrollment_core::{
    SmallVec,
    environment::Clock,
    reducer::{Decision, Reducer},
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Events applied by one successful transition
///
/// One event for most transitions; a cancellation that promotes the head of
/// the wait queue yields `EnrollmentCancelled` followed by `Promoted`.
pub type Transition = Decision<EnrollmentEvent>;

/// The enrollment operations of a single event
///
/// Implementations serialize the four transitions with respect to each other.
/// How they do it (lock, actor, single-writer task) is their business.
pub trait EnrollmentEngine: Send + Sync {
    /// Event driven by this engine
    fn event_id(&self) -> EventId;

    /// Take a free slot
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownUser`], or a refusal:
    /// [`EnrollmentError::CapacityExceeded`] or [`EnrollmentError::AlreadyInvolved`].
    ///
    /// [`EnrollmentError::CapacityExceeded`]: crate::EnrollmentError::CapacityExceeded
    /// [`EnrollmentError::AlreadyInvolved`]: crate::EnrollmentError::AlreadyInvolved
    fn enroll(&self, user: UserId) -> Result<Transition, EngineError>;

    /// Give up a slot, promoting the head of the wait queue if there is one
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownUser`], or the refusal [`EnrollmentError::NotEnrolled`].
    ///
    /// [`EnrollmentError::NotEnrolled`]: crate::EnrollmentError::NotEnrolled
    fn cancel_enrollment(&self, user: UserId) -> Result<Transition, EngineError>;

    /// Queue for a slot on a full event
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownUser`], or a refusal:
    /// [`EnrollmentError::CapacityAvailable`] or [`EnrollmentError::AlreadyInvolved`].
    ///
    /// [`EnrollmentError::CapacityAvailable`]: crate::EnrollmentError::CapacityAvailable
    /// [`EnrollmentError::AlreadyInvolved`]: crate::EnrollmentError::AlreadyInvolved
    fn join_wait(&self, user: UserId) -> Result<Transition, EngineError>;

    /// Leave the wait queue from any position
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownUser`], or the refusal [`EnrollmentError::NotWaiting`].
    ///
    /// [`EnrollmentError::NotWaiting`]: crate::EnrollmentError::NotWaiting
    fn cancel_wait(&self, user: UserId) -> Result<Transition, EngineError>;

    /// Wait counters
    fn stats(&self) -> WaitStats;

    /// Consistent copy of the whole event state
    fn snapshot(&self) -> EnrollmentSnapshot;

    /// Whether every slot is taken
    fn is_full(&self) -> bool;

    /// Current number of enrollments
    fn enrolled_count(&self) -> usize;

    /// Percentage of waiting users who were promoted, `None` if nobody waited
    fn success_rate(&self) -> Option<f64> {
        self.stats().success_rate()
    }

    /// Percentage of waiting users who withdrew, `None` if nobody waited
    fn cancel_rate(&self) -> Option<f64> {
        self.stats().cancel_rate()
    }
}

/// Mutex-backed [`EnrollmentEngine`]
///
/// Built by [`EnrollmentService::register_event`](crate::EnrollmentService::register_event),
/// which owns the membership registry the engine commits to.
pub struct EventEngine {
    event: EventId,
    state: Mutex<EnrollmentState>,
    reducer: EnrollmentReducer,
    env: EnrollmentEnvironment,
    membership: Arc<MembershipRegistry>,
}

impl EventEngine {
    /// Creates an engine with no enrollments and an empty wait queue
    #[must_use]
    pub(crate) fn new(event: &Event, clock: Arc<dyn Clock>, membership: Arc<MembershipRegistry>) -> Self {
        let env = EnrollmentEnvironment::new(clock, membership.clone());
        Self {
            event: event.id,
            state: Mutex::new(EnrollmentState::new(event.id, event.capacity)),
            reducer: EnrollmentReducer::new(),
            env,
            membership,
        }
    }

    /// Read the current state via a closure
    ///
    /// The event lock is held while `f` runs.
    pub fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&EnrollmentState) -> T,
    {
        f(&self.lock())
    }

    // A panicking transition panics before mutating the state, so a poisoned
    // lock still guards a consistent value.
    fn lock(&self) -> MutexGuard<'_, EnrollmentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one command through the decide / commit / apply pipeline
    ///
    /// # Panics
    ///
    /// If the event and membership sides disagree about a user.
    #[tracing::instrument(
        skip_all,
        name = "enrollment_transition",
        fields(event = %self.event, operation = command.operation(), user = %command.user())
    )]
    fn execute(&self, command: EnrollmentCommand) -> Result<Transition, EngineError> {
        let operation = command.operation();
        let user = command.user();
        // Registration is never undone, so the answer holds for the whole transition
        if !self.membership.contains(&user) {
            tracing::debug!("Transition by unregistered user");
            metrics::record_unknown_user(operation);
            return Err(EngineError::UnknownUser(user));
        }
        let mut state = self.lock();

        let events = match self.reducer.decide(&state, command, &self.env) {
            Ok(events) => events,
            Err(TransitionError::Rejected(error)) => {
                tracing::debug!(%error, "Transition rejected");
                metrics::record_rejected(operation, &error);
                return Err(error.into());
            },
            Err(TransitionError::Invariant(violation)) => abort(&violation),
        };

        let changes: SmallVec<[MembershipChange; 4]> =
            events.iter().map(EnrollmentEvent::membership_change).collect();
        if let Err(error) = self.membership.apply_all(&changes) {
            abort(&error);
        }

        for event in &events {
            self.reducer.apply(&mut state, event);
            match event {
                EnrollmentEvent::Promoted { record } => {
                    let waited = record.waited.unwrap_or_default();
                    tracing::info!(
                        promoted = %record.user,
                        waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                        "Promoted user from wait queue"
                    );
                    metrics::record_promotion(waited);
                },
                EnrollmentEvent::WaitCancelled { waited, .. } => metrics::record_wait_cancelled(*waited),
                _ => {},
            }
        }

        tracing::debug!(
            enrolled = state.enrolled_count(),
            waiting = state.waiting_count(),
            "Transition applied"
        );
        metrics::record_accepted(operation);
        Ok(events)
    }
}

/// Give up on a transition whose two sides disagree
#[cold]
#[allow(clippy::panic)] // Continuing would expose a half-applied transition
fn abort(violation: &dyn fmt::Display) -> ! {
    tracing::error!(%violation, "Enrollment invariant violated, aborting transition");
    panic!("enrollment invariant violated: {violation}");
}

impl EnrollmentEngine for EventEngine {
    fn event_id(&self) -> EventId {
        self.event
    }

    fn enroll(&self, user: UserId) -> Result<Transition, EngineError> {
        self.execute(EnrollmentCommand::Enroll { user })
    }

    fn cancel_enrollment(&self, user: UserId) -> Result<Transition, EngineError> {
        self.execute(EnrollmentCommand::CancelEnrollment { user })
    }

    fn join_wait(&self, user: UserId) -> Result<Transition, EngineError> {
        self.execute(EnrollmentCommand::JoinWait { user })
    }

    fn cancel_wait(&self, user: UserId) -> Result<Transition, EngineError> {
        self.execute(EnrollmentCommand::CancelWait { user })
    }

    fn stats(&self) -> WaitStats {
        self.lock().stats()
    }

    fn snapshot(&self) -> EnrollmentSnapshot {
        self.lock().snapshot()
    }

    fn is_full(&self) -> bool {
        self.lock().is_full()
    }

    fn enrolled_count(&self) -> usize {
        self.lock().enrolled_count()
    }
}

impl fmt::Debug for EventEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEngine")
            .field("event", &self.event)
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnrollmentError;
    use crate::membership::{MembershipOp, MembershipQuery};
    use crate::types::{Capacity, Involvement, User};
    use chrono::NaiveDate;
    use enrollment_testing::test_clock;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    fn setup(capacity: u32, users: usize) -> (EventEngine, Arc<MembershipRegistry>, Vec<UserId>) {
        let registry = Arc::new(MembershipRegistry::new());
        let users: Vec<UserId> = (0..users)
            .map(|i| {
                let user = User::new(format!("user-{i}"));
                registry.register(&user);
                user.id
            })
            .collect();
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let event = Event::builder(users[0], "Engine Test", date, Capacity::new(capacity)).build();
        let engine = EventEngine::new(&event, Arc::new(test_clock()), registry.clone());
        (engine, registry, users)
    }

    #[test]
    fn test_transitions_update_both_sides() {
        let (engine, registry, users) = setup(1, 2);
        let event = engine.event_id();

        engine.enroll(users[0]).unwrap();
        engine.join_wait(users[1]).unwrap();
        assert!(engine.is_full());
        assert_eq!(registry.involvement(&users[1], &event), Involvement::Waiting);

        let transition = engine.cancel_enrollment(users[0]).unwrap();
        assert_eq!(transition.len(), 2);
        assert_eq!(registry.involvement(&users[0], &event), Involvement::None);
        assert_eq!(registry.involvement(&users[1], &event), Involvement::Enrolled);
        assert_eq!(engine.enrolled_count(), 1);
        assert_eq!(engine.success_rate(), Some(100.0));
    }

    #[test]
    fn test_rejection_changes_nothing() {
        let (engine, registry, users) = setup(2, 1);
        let before = engine.snapshot();

        let error = engine.cancel_wait(users[0]).unwrap_err();

        assert!(matches!(error, EngineError::Rejected(EnrollmentError::NotWaiting { .. })));
        assert_eq!(engine.snapshot(), before);
        assert_eq!(registry.involvement(&users[0], &engine.event_id()), Involvement::None);
        assert_eq!(engine.cancel_rate(), None);
    }

    #[test]
    fn test_unregistered_user_is_turned_away_without_panic() {
        let (engine, registry, users) = setup(1, 1);
        let stranger = UserId::new();
        let before = engine.snapshot();

        assert_eq!(engine.enroll(stranger), Err(EngineError::UnknownUser(stranger)));
        assert_eq!(engine.snapshot(), before);

        engine.enroll(users[0]).unwrap();
        let before = engine.snapshot();
        let error = engine.join_wait(stranger).unwrap_err();
        assert_eq!(error, EngineError::UnknownUser(stranger));
        assert_eq!(error.rejection(), None);
        assert_eq!(engine.cancel_enrollment(stranger), Err(EngineError::UnknownUser(stranger)));
        assert_eq!(engine.cancel_wait(stranger), Err(EngineError::UnknownUser(stranger)));

        assert_eq!(engine.snapshot(), before);
        assert!(registry.snapshot(&stranger).is_none());
        assert_eq!(registry.involvement(&users[0], &engine.event_id()), Involvement::Enrolled);
    }

    #[test]
    fn test_state_reader() {
        let (engine, _registry, users) = setup(3, 2);
        engine.enroll(users[1]).unwrap();

        let enrolled = engine.state(|state| state.is_enrolled(&users[1]));
        assert!(enrolled);
    }

    #[test]
    fn test_drift_panics_without_applying() {
        let (engine, registry, users) = setup(2, 1);
        let event = engine.event_id();
        engine.enroll(users[0]).unwrap();
        registry
            .apply(MembershipChange::new(users[0], event, MembershipOp::UnmarkEnrolled))
            .unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| engine.cancel_enrollment(users[0])));

        assert!(result.is_err());
        // The poisoned lock is recovered and the event side is untouched
        assert_eq!(engine.enrolled_count(), 1);
        assert!(engine.state(|state| state.is_enrolled(&users[0])));
    }
}
