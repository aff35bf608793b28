//! Enrollment aggregate.
//!
//! Owns, for a single event, the set of confirmed enrollments, the FIFO wait
//! queue and the wait counters. Each `(user, event)` pair moves through three
//! states:
//!
//! ```text
//!             enroll (slot free)
//!     None ───────────────────────▶ Enrolled
//!      │  ▲                          │  ▲
//!      │  │ cancel enrollment        │  │
//!      │  └──────────────────────────┘  │ promotion (another user cancelled)
//!      │                                │
//!      │ join wait (event full)         │
//!      ▼                                │
//!    Waiting ───────────────────────────┘
//!      │
//!      └── cancel wait ──▶ None
//! ```
//!
//! There is no `Enrolled -> Waiting` edge. A user may re-enroll or re-join
//! the queue after any cancellation.
//!
//! **Consistency**: every decision first checks that the event's collections
//! and the user's membership agree about the user. Disagreement is reported as
//! an [`InvariantViolation`], never as a refusal.

use crate::error::{EnrollmentError, InvariantViolation, TransitionError};
use crate::membership::{MembershipChange, MembershipOp, MembershipQuery};
use crate::types::{Capacity, EnrollmentRecord, EventId, Involvement, UserId, WaitEntry};
use chrono::{DateTime, Utc};
use enrollment_core::{
    environment::Clock,
    reducer::{Decision, Reducer},
    smallvec,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// State
// ============================================================================

/// Enrollment state for one event
#[derive(Clone, Debug)]
pub struct EnrollmentState {
    event: EventId,
    capacity: Capacity,
    /// At most one record per user
    enrollments: HashMap<UserId, EnrollmentRecord>,
    /// Wait entries keyed by a monotonically increasing ticket; iteration
    /// order is join order
    wait_queue: BTreeMap<u64, WaitEntry>,
    /// Ticket held by each waiting user
    wait_tickets: HashMap<UserId, u64>,
    next_ticket: u64,
    wait_count: u64,
    wait_success_count: u64,
    wait_cancel_count: u64,
}

impl EnrollmentState {
    /// Empty state for an event
    #[must_use]
    pub fn new(event: EventId, capacity: Capacity) -> Self {
        Self {
            event,
            capacity,
            enrollments: HashMap::new(),
            wait_queue: BTreeMap::new(),
            wait_tickets: HashMap::new(),
            next_ticket: 0,
            wait_count: 0,
            wait_success_count: 0,
            wait_cancel_count: 0,
        }
    }

    /// Event this state belongs to
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        self.event
    }

    /// Maximum number of enrollments
    #[must_use]
    pub const fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Current number of enrollments
    #[must_use]
    pub fn enrolled_count(&self) -> usize {
        self.enrollments.len()
    }

    /// Current length of the wait queue
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.wait_queue.len()
    }

    /// Whether every slot is taken
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.enrollments.len() >= self.capacity.as_usize()
    }

    /// Whether `user` holds a slot
    #[must_use]
    pub fn is_enrolled(&self, user: &UserId) -> bool {
        self.enrollments.contains_key(user)
    }

    /// Whether `user` is in the wait queue
    #[must_use]
    pub fn is_waiting(&self, user: &UserId) -> bool {
        self.wait_tickets.contains_key(user)
    }

    /// Where `user` stands according to this event's collections
    #[must_use]
    pub fn involvement(&self, user: &UserId) -> Involvement {
        if self.is_enrolled(user) {
            Involvement::Enrolled
        } else if self.is_waiting(user) {
            Involvement::Waiting
        } else {
            Involvement::None
        }
    }

    /// The enrollment record of `user`
    #[must_use]
    pub fn enrollment(&self, user: &UserId) -> Option<&EnrollmentRecord> {
        self.enrollments.get(user)
    }

    /// The wait entry of `user`
    #[must_use]
    pub fn wait_entry(&self, user: &UserId) -> Option<&WaitEntry> {
        self.wait_tickets
            .get(user)
            .and_then(|ticket| self.wait_queue.get(ticket))
    }

    /// Zero-based position of `user` in the wait queue
    #[must_use]
    pub fn wait_position(&self, user: &UserId) -> Option<usize> {
        self.wait_tickets
            .get(user)
            .map(|ticket| self.wait_queue.range(..*ticket).count())
    }

    /// The longest-waiting entry
    #[must_use]
    pub fn wait_head(&self) -> Option<&WaitEntry> {
        self.wait_queue.values().next()
    }

    /// All enrollment records, in no particular order
    pub fn enrollments(&self) -> impl Iterator<Item = &EnrollmentRecord> {
        self.enrollments.values()
    }

    /// Wait entries, oldest first
    pub fn wait_queue(&self) -> impl Iterator<Item = &WaitEntry> {
        self.wait_queue.values()
    }

    /// Wait counters
    #[must_use]
    pub fn stats(&self) -> WaitStats {
        WaitStats {
            joined: self.wait_count,
            promoted: self.wait_success_count,
            cancelled: self.wait_cancel_count,
            waiting: self.wait_queue.len() as u64,
        }
    }

    /// Serializable copy of the state
    #[must_use]
    pub fn snapshot(&self) -> EnrollmentSnapshot {
        let mut enrollments: Vec<EnrollmentRecord> = self.enrollments.values().copied().collect();
        enrollments.sort_by_key(|record| (record.enrolled_at, record.user));

        EnrollmentSnapshot {
            event: self.event,
            capacity: self.capacity,
            enrollments,
            wait_queue: self.wait_queue.values().copied().collect(),
            stats: self.stats(),
        }
    }
}

/// Wait queue counters for one event
///
/// `promoted + cancelled + waiting == joined` holds after every transition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitStats {
    /// Users who ever joined the wait queue
    pub joined: u64,
    /// Users promoted from the queue to an enrollment
    pub promoted: u64,
    /// Users who left the queue before promotion
    pub cancelled: u64,
    /// Users currently waiting
    pub waiting: u64,
}

impl WaitStats {
    /// Percentage of waiting users who were promoted
    ///
    /// `None` when nobody ever waited.
    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        Self::ratio(self.promoted, self.joined)
    }

    /// Percentage of waiting users who gave up
    ///
    /// `None` when nobody ever waited.
    #[must_use]
    pub fn cancel_rate(&self) -> Option<f64> {
        Self::ratio(self.cancelled, self.joined)
    }

    #[allow(clippy::cast_precision_loss)] // Counters stay far below 2^52
    fn ratio(part: u64, total: u64) -> Option<f64> {
        (total > 0).then(|| part as f64 / total as f64 * 100.0)
    }
}

/// Read model of one event's enrollment state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentSnapshot {
    /// Event
    pub event: EventId,
    /// Maximum number of enrollments
    pub capacity: Capacity,
    /// Enrollments, oldest first
    pub enrollments: Vec<EnrollmentRecord>,
    /// Wait queue, oldest first
    pub wait_queue: Vec<WaitEntry>,
    /// Wait counters
    pub stats: WaitStats,
}

impl EnrollmentSnapshot {
    /// Whether every slot is taken
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.enrollments.len() >= self.capacity.as_usize()
    }
}

// ============================================================================
// Commands and Events
// ============================================================================

/// Requests to change a user's involvement with the event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentCommand {
    /// Take a free slot
    Enroll {
        /// Requesting user
        user: UserId,
    },
    /// Give up a slot, promoting the head of the wait queue
    CancelEnrollment {
        /// Requesting user
        user: UserId,
    },
    /// Queue for a slot on a full event
    JoinWait {
        /// Requesting user
        user: UserId,
    },
    /// Leave the wait queue
    CancelWait {
        /// Requesting user
        user: UserId,
    },
}

impl EnrollmentCommand {
    /// User issuing the command
    #[must_use]
    pub const fn user(&self) -> UserId {
        match self {
            Self::Enroll { user }
            | Self::CancelEnrollment { user }
            | Self::JoinWait { user }
            | Self::CancelWait { user } => *user,
        }
    }

    /// Short operation name for logs and metrics
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Enroll { .. } => "enroll",
            Self::CancelEnrollment { .. } => "cancel_enrollment",
            Self::JoinWait { .. } => "join_wait",
            Self::CancelWait { .. } => "cancel_wait",
        }
    }
}

/// Facts emitted by accepted commands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentEvent {
    /// A user took a free slot
    Enrolled {
        /// The new enrollment (no wait duration)
        record: EnrollmentRecord,
    },

    /// A user gave up their slot
    EnrollmentCancelled {
        /// User
        user: UserId,
        /// Event
        event: EventId,
        /// When
        cancelled_at: DateTime<Utc>,
    },

    /// A user joined the tail of the wait queue
    WaitJoined {
        /// The new wait entry
        entry: WaitEntry,
    },

    /// A user left the wait queue before being promoted
    WaitCancelled {
        /// User
        user: UserId,
        /// Event
        event: EventId,
        /// When
        cancelled_at: DateTime<Utc>,
        /// How long they had waited
        waited: Duration,
    },

    /// The head of the wait queue took the slot freed by a cancellation
    Promoted {
        /// The new enrollment, carrying the wait duration
        record: EnrollmentRecord,
    },
}

impl EnrollmentEvent {
    /// User the event is about
    #[must_use]
    pub const fn user(&self) -> UserId {
        match self {
            Self::Enrolled { record } | Self::Promoted { record } => record.user,
            Self::WaitJoined { entry } => entry.user,
            Self::EnrollmentCancelled { user, .. } | Self::WaitCancelled { user, .. } => *user,
        }
    }

    /// Event the fact belongs to
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        match self {
            Self::Enrolled { record } | Self::Promoted { record } => record.event,
            Self::WaitJoined { entry } => entry.event,
            Self::EnrollmentCancelled { event, .. } | Self::WaitCancelled { event, .. } => *event,
        }
    }

    /// The membership update that must accompany this fact
    #[must_use]
    pub(crate) const fn membership_change(&self) -> MembershipChange {
        let op = match self {
            Self::Enrolled { .. } => MembershipOp::MarkEnrolled,
            Self::EnrollmentCancelled { .. } => MembershipOp::UnmarkEnrolled,
            Self::WaitJoined { .. } => MembershipOp::MarkWaiting,
            Self::WaitCancelled { .. } => MembershipOp::UnmarkWaiting,
            Self::Promoted { .. } => MembershipOp::Promote,
        };
        MembershipChange::new(self.user(), self.event_id(), op)
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the enrollment aggregate
#[derive(Clone)]
pub struct EnrollmentEnvironment {
    /// Clock for timestamps and wait durations
    pub clock: Arc<dyn Clock>,
    /// Read access to user memberships
    pub membership: Arc<dyn MembershipQuery>,
}

impl EnrollmentEnvironment {
    /// Creates a new `EnrollmentEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, membership: Arc<dyn MembershipQuery>) -> Self {
        Self { clock, membership }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the enrollment aggregate
#[derive(Clone, Copy, Debug, Default)]
pub struct EnrollmentReducer;

impl EnrollmentReducer {
    /// Creates a new `EnrollmentReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Confirms both sides agree on `user` and returns their shared answer
    fn consistent_involvement(
        state: &EnrollmentState,
        user: UserId,
        env: &EnrollmentEnvironment,
    ) -> Result<Involvement, InvariantViolation> {
        let event_side = state.involvement(&user);
        let membership_side = env.membership.involvement(&user, &state.event_id());
        if event_side == membership_side {
            Ok(event_side)
        } else {
            Err(InvariantViolation {
                user,
                event: state.event_id(),
                event_side,
                membership_side,
            })
        }
    }

    /// Validates `Enroll`
    fn validate_enroll(
        state: &EnrollmentState,
        user: UserId,
        involvement: Involvement,
    ) -> Result<(), EnrollmentError> {
        if state.is_full() {
            return Err(EnrollmentError::CapacityExceeded {
                event: state.event_id(),
                capacity: state.capacity().value(),
            });
        }
        if involvement.is_involved() {
            return Err(EnrollmentError::AlreadyInvolved {
                user,
                event: state.event_id(),
                involvement,
            });
        }
        Ok(())
    }

    /// Validates `JoinWait`
    fn validate_join_wait(
        state: &EnrollmentState,
        user: UserId,
        involvement: Involvement,
    ) -> Result<(), EnrollmentError> {
        if !state.is_full() {
            return Err(EnrollmentError::CapacityAvailable {
                event: state.event_id(),
            });
        }
        if involvement.is_involved() {
            return Err(EnrollmentError::AlreadyInvolved {
                user,
                event: state.event_id(),
                involvement,
            });
        }
        Ok(())
    }

    fn decide_cancel_enrollment(
        state: &EnrollmentState,
        user: UserId,
        involvement: Involvement,
        env: &EnrollmentEnvironment,
    ) -> Result<Decision<EnrollmentEvent>, TransitionError> {
        let event = state.event_id();
        if involvement != Involvement::Enrolled {
            return Err(EnrollmentError::NotEnrolled { user, event }.into());
        }

        let now = env.clock.now();
        let mut events: Decision<EnrollmentEvent> = smallvec![EnrollmentEvent::EnrollmentCancelled {
            user,
            event,
            cancelled_at: now,
        }];

        // Exactly one slot was freed, so the head is promoted unconditionally
        if let Some(head) = state.wait_head() {
            let promoted = Self::consistent_involvement(state, head.user, env)?;
            if promoted != Involvement::Waiting {
                return Err(InvariantViolation {
                    user: head.user,
                    event,
                    event_side: Involvement::Waiting,
                    membership_side: promoted,
                }
                .into());
            }
            events.push(EnrollmentEvent::Promoted {
                record: EnrollmentRecord::promoted(head.user, event, now, head.waited_until(now)),
            });
        }

        Ok(events)
    }

    fn decide_cancel_wait(
        state: &EnrollmentState,
        user: UserId,
        env: &EnrollmentEnvironment,
    ) -> Result<Decision<EnrollmentEvent>, TransitionError> {
        let event = state.event_id();
        let Some(entry) = state.wait_entry(&user) else {
            return Err(EnrollmentError::NotWaiting { user, event }.into());
        };

        let now = env.clock.now();
        Ok(smallvec![EnrollmentEvent::WaitCancelled {
            user,
            event,
            cancelled_at: now,
            waited: entry.waited_until(now),
        }])
    }

    fn remove_wait_entry(state: &mut EnrollmentState, user: &UserId) -> Option<WaitEntry> {
        let ticket = state.wait_tickets.remove(user)?;
        state.wait_queue.remove(&ticket)
    }
}

impl Reducer for EnrollmentReducer {
    type State = EnrollmentState;
    type Command = EnrollmentCommand;
    type Event = EnrollmentEvent;
    type Environment = EnrollmentEnvironment;
    type Error = TransitionError;

    fn decide(
        &self,
        state: &Self::State,
        command: Self::Command,
        env: &Self::Environment,
    ) -> Result<Decision<Self::Event>, Self::Error> {
        let user = command.user();
        let event = state.event_id();
        let involvement = Self::consistent_involvement(state, user, env)?;

        match command {
            EnrollmentCommand::Enroll { .. } => {
                Self::validate_enroll(state, user, involvement)?;
                Ok(smallvec![EnrollmentEvent::Enrolled {
                    record: EnrollmentRecord::direct(user, event, env.clock.now()),
                }])
            },

            EnrollmentCommand::CancelEnrollment { .. } => {
                Self::decide_cancel_enrollment(state, user, involvement, env)
            },

            EnrollmentCommand::JoinWait { .. } => {
                Self::validate_join_wait(state, user, involvement)?;
                Ok(smallvec![EnrollmentEvent::WaitJoined {
                    entry: WaitEntry::new(user, event, env.clock.now()),
                }])
            },

            EnrollmentCommand::CancelWait { .. } => Self::decide_cancel_wait(state, user, env),
        }
    }

    fn apply(&self, state: &mut Self::State, event: &Self::Event) {
        match event {
            EnrollmentEvent::Enrolled { record } => {
                state.enrollments.insert(record.user, *record);
            },

            EnrollmentEvent::EnrollmentCancelled { user, .. } => {
                state.enrollments.remove(user);
            },

            EnrollmentEvent::WaitJoined { entry } => {
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.wait_queue.insert(ticket, *entry);
                state.wait_tickets.insert(entry.user, ticket);
                state.wait_count += 1;
            },

            EnrollmentEvent::WaitCancelled { user, .. } => {
                if Self::remove_wait_entry(state, user).is_some() {
                    state.wait_cancel_count += 1;
                }
            },

            EnrollmentEvent::Promoted { record } => {
                if Self::remove_wait_entry(state, &record.user).is_some() {
                    state.enrollments.insert(record.user, *record);
                    state.wait_success_count += 1;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MembershipRegistry;
    use crate::types::User;
    use enrollment_testing::{ManualClock, ReducerTest, test_clock};

    struct Fixture {
        state: EnrollmentState,
        env: EnrollmentEnvironment,
        registry: Arc<MembershipRegistry>,
    }

    impl Fixture {
        fn new(capacity: u32) -> Self {
            let registry = Arc::new(MembershipRegistry::new());
            Self {
                state: EnrollmentState::new(EventId::new(), Capacity::new(capacity)),
                env: EnrollmentEnvironment::new(Arc::new(test_clock()), registry.clone()),
                registry,
            }
        }

        fn user(&self) -> UserId {
            let user = User::new("test user");
            self.registry.register(&user);
            user.id
        }

        /// Reduce and commit the membership side, like the engine does
        fn run(&mut self, command: EnrollmentCommand) -> Result<Decision<EnrollmentEvent>, TransitionError> {
            let events = EnrollmentReducer.decide(&self.state, command, &self.env)?;
            let changes: Vec<MembershipChange> =
                events.iter().map(EnrollmentEvent::membership_change).collect();
            self.registry.apply_all(&changes).unwrap();
            for event in &events {
                EnrollmentReducer.apply(&mut self.state, event);
            }
            Ok(events)
        }
    }

    #[test]
    fn test_enroll_with_free_slot() {
        let fixture = Fixture::new(2);
        let user = fixture.user();

        ReducerTest::new(EnrollmentReducer::new())
            .with_env(fixture.env.clone())
            .given_state(fixture.state.clone())
            .when_command(EnrollmentCommand::Enroll { user })
            .then_state(move |state| {
                assert_eq!(state.enrolled_count(), 1);
                assert!(state.is_enrolled(&user));
                assert_eq!(state.enrollment(&user).unwrap().waited, None);
            })
            .then_events(move |events| {
                assert_eq!(events.len(), 1);
                assert!(matches!(events[0], EnrollmentEvent::Enrolled { record } if record.user == user));
            })
            .run();
    }

    #[test]
    fn test_enroll_when_full_is_refused() {
        let mut fixture = Fixture::new(1);
        let first = fixture.user();
        let second = fixture.user();
        fixture.run(EnrollmentCommand::Enroll { user: first }).unwrap();
        let event = fixture.state.event_id();

        ReducerTest::new(EnrollmentReducer::new())
            .with_env(fixture.env.clone())
            .given_state(fixture.state.clone())
            .when_command(EnrollmentCommand::Enroll { user: second })
            .then_state(|state| {
                assert_eq!(state.enrolled_count(), 1);
            })
            .then_error(move |error| {
                assert_eq!(
                    *error,
                    TransitionError::Rejected(EnrollmentError::CapacityExceeded { event, capacity: 1 })
                );
            })
            .run();
    }

    #[test]
    fn test_enroll_twice_is_refused() {
        let mut fixture = Fixture::new(3);
        let user = fixture.user();
        fixture.run(EnrollmentCommand::Enroll { user }).unwrap();

        let error = fixture.run(EnrollmentCommand::Enroll { user }).unwrap_err();
        assert!(matches!(
            error.rejection(),
            Some(EnrollmentError::AlreadyInvolved {
                involvement: Involvement::Enrolled,
                ..
            })
        ));
        assert_eq!(fixture.state.enrolled_count(), 1);
    }

    #[test]
    fn test_join_wait_requires_full_event() {
        let fixture = Fixture::new(1);
        let user = fixture.user();
        let event = fixture.state.event_id();

        ReducerTest::new(EnrollmentReducer::new())
            .with_env(fixture.env.clone())
            .given_state(fixture.state.clone())
            .when_command(EnrollmentCommand::JoinWait { user })
            .then_state(|state| {
                assert_eq!(state.waiting_count(), 0);
                assert_eq!(state.stats().joined, 0);
            })
            .then_error(move |error| {
                assert_eq!(error.rejection(), Some(EnrollmentError::CapacityAvailable { event }));
            })
            .run();
    }

    #[test]
    fn test_enrolled_user_cannot_join_wait() {
        let mut fixture = Fixture::new(1);
        let user = fixture.user();
        fixture.run(EnrollmentCommand::Enroll { user }).unwrap();

        let error = fixture.run(EnrollmentCommand::JoinWait { user }).unwrap_err();
        assert!(matches!(
            error.rejection(),
            Some(EnrollmentError::AlreadyInvolved { .. })
        ));
        assert_eq!(fixture.state.waiting_count(), 0);
    }

    #[test]
    fn test_waiting_user_cannot_join_twice_or_enroll() {
        let mut fixture = Fixture::new(1);
        let holder = fixture.user();
        let waiter = fixture.user();
        fixture.run(EnrollmentCommand::Enroll { user: holder }).unwrap();
        fixture.run(EnrollmentCommand::JoinWait { user: waiter }).unwrap();

        assert!(matches!(
            fixture.run(EnrollmentCommand::JoinWait { user: waiter }).unwrap_err().rejection(),
            Some(EnrollmentError::AlreadyInvolved {
                involvement: Involvement::Waiting,
                ..
            })
        ));
        // Full event: capacity is checked before involvement
        assert!(matches!(
            fixture.run(EnrollmentCommand::Enroll { user: waiter }).unwrap_err().rejection(),
            Some(EnrollmentError::CapacityExceeded { .. })
        ));
        assert_eq!(fixture.state.waiting_count(), 1);
        assert_eq!(fixture.state.stats().joined, 1);
    }

    #[test]
    fn test_cancel_enrollment_promotes_queue_head() {
        let mut fixture = Fixture::new(1);
        let holder = fixture.user();
        let first = fixture.user();
        let second = fixture.user();
        fixture.run(EnrollmentCommand::Enroll { user: holder }).unwrap();
        fixture.run(EnrollmentCommand::JoinWait { user: first }).unwrap();
        fixture.run(EnrollmentCommand::JoinWait { user: second }).unwrap();

        ReducerTest::new(EnrollmentReducer::new())
            .with_env(fixture.env.clone())
            .given_state(fixture.state.clone())
            .when_command(EnrollmentCommand::CancelEnrollment { user: holder })
            .then_state(move |state| {
                assert!(!state.is_enrolled(&holder));
                assert!(state.is_enrolled(&first));
                assert_eq!(state.wait_position(&second), Some(0));
                assert_eq!(state.stats(), WaitStats {
                    joined: 2,
                    promoted: 1,
                    cancelled: 0,
                    waiting: 1,
                });
            })
            .then_events(move |events| {
                assert_eq!(events.len(), 2);
                assert!(matches!(events[0], EnrollmentEvent::EnrollmentCancelled { user, .. } if user == holder));
                assert!(matches!(events[1], EnrollmentEvent::Promoted { record } if record.user == first));
            })
            .run();
    }

    #[test]
    fn test_cancel_enrollment_with_empty_queue_frees_slot() {
        let mut fixture = Fixture::new(1);
        let user = fixture.user();
        fixture.run(EnrollmentCommand::Enroll { user }).unwrap();

        let events = fixture.run(EnrollmentCommand::CancelEnrollment { user }).unwrap();

        assert_eq!(events.len(), 1);
        assert!(!fixture.state.is_full());
        assert_eq!(fixture.state.stats().promoted, 0);
    }

    #[test]
    fn test_cancel_enrollment_twice() {
        let mut fixture = Fixture::new(2);
        let user = fixture.user();
        let event = fixture.state.event_id();
        fixture.run(EnrollmentCommand::Enroll { user }).unwrap();

        assert!(fixture.run(EnrollmentCommand::CancelEnrollment { user }).is_ok());
        assert_eq!(
            fixture.run(EnrollmentCommand::CancelEnrollment { user }).unwrap_err(),
            TransitionError::Rejected(EnrollmentError::NotEnrolled { user, event })
        );
        assert_eq!(fixture.state.enrolled_count(), 0);
    }

    #[test]
    fn test_cancel_wait_removes_any_position() {
        let mut fixture = Fixture::new(1);
        let holder = fixture.user();
        let waiters: Vec<UserId> = (0..3).map(|_| fixture.user()).collect();
        fixture.run(EnrollmentCommand::Enroll { user: holder }).unwrap();
        for user in &waiters {
            fixture.run(EnrollmentCommand::JoinWait { user: *user }).unwrap();
        }

        fixture.run(EnrollmentCommand::CancelWait { user: waiters[1] }).unwrap();

        let queue: Vec<UserId> = fixture.state.wait_queue().map(|entry| entry.user).collect();
        assert_eq!(queue, vec![waiters[0], waiters[2]]);
        assert_eq!(fixture.state.wait_position(&waiters[2]), Some(1));
        assert_eq!(fixture.state.stats().cancelled, 1);
        assert_eq!(fixture.registry.involvement(&waiters[1], &fixture.state.event_id()), Involvement::None);
    }

    #[test]
    fn test_cancel_wait_without_entry() {
        let fixture = Fixture::new(1);
        let user = fixture.user();
        let event = fixture.state.event_id();

        ReducerTest::new(EnrollmentReducer::new())
            .with_env(fixture.env.clone())
            .given_state(fixture.state.clone())
            .when_command(EnrollmentCommand::CancelWait { user })
            .then_state(|state| {
                assert_eq!(state.stats().cancelled, 0);
            })
            .then_error(move |error| {
                assert_eq!(error.rejection(), Some(EnrollmentError::NotWaiting { user, event }));
            })
            .run();
    }

    #[test]
    fn test_promotion_records_wait_duration() {
        let clock = Arc::new(ManualClock::starting_at(test_clock().now()));
        let mut fixture = Fixture::new(1);
        fixture.env.clock = Arc::clone(&clock) as Arc<dyn Clock>;
        let holder = fixture.user();
        let waiter = fixture.user();

        fixture.run(EnrollmentCommand::Enroll { user: holder }).unwrap();
        fixture.run(EnrollmentCommand::JoinWait { user: waiter }).unwrap();
        clock.advance(chrono::Duration::minutes(3));
        fixture.run(EnrollmentCommand::CancelEnrollment { user: holder }).unwrap();

        let record = fixture.state.enrollment(&waiter).unwrap();
        assert!(record.was_promoted());
        assert_eq!(record.waited, Some(Duration::from_secs(180)));
        assert_eq!(record.enrolled_at, clock.now());
    }

    #[test]
    fn test_promoted_user_can_cancel_and_rejoin() {
        let mut fixture = Fixture::new(1);
        let holder = fixture.user();
        let waiter = fixture.user();

        fixture.run(EnrollmentCommand::Enroll { user: holder }).unwrap();
        fixture.run(EnrollmentCommand::JoinWait { user: waiter }).unwrap();
        fixture.run(EnrollmentCommand::CancelEnrollment { user: holder }).unwrap();
        fixture.run(EnrollmentCommand::JoinWait { user: holder }).unwrap();
        fixture.run(EnrollmentCommand::CancelEnrollment { user: waiter }).unwrap();
        fixture.run(EnrollmentCommand::JoinWait { user: waiter }).unwrap();

        assert!(fixture.state.is_enrolled(&holder));
        assert!(fixture.state.is_waiting(&waiter));
        assert_eq!(fixture.state.stats(), WaitStats {
            joined: 3,
            promoted: 2,
            cancelled: 0,
            waiting: 1,
        });
    }

    #[test]
    fn test_membership_drift_is_an_invariant_violation() {
        let mut fixture = Fixture::new(2);
        let user = fixture.user();
        fixture.run(EnrollmentCommand::Enroll { user }).unwrap();
        // Membership forgets the enrollment behind the engine's back
        fixture
            .registry
            .apply(MembershipChange::new(user, fixture.state.event_id(), MembershipOp::UnmarkEnrolled))
            .unwrap();

        let error = EnrollmentReducer
            .decide(&fixture.state, EnrollmentCommand::CancelEnrollment { user }, &fixture.env)
            .unwrap_err();

        assert!(matches!(
            error,
            TransitionError::Invariant(InvariantViolation {
                event_side: Involvement::Enrolled,
                membership_side: Involvement::None,
                ..
            })
        ));
        assert!(error.rejection().is_none());
    }

    #[test]
    fn test_rates_are_absent_without_waits() {
        let stats = WaitStats::default();
        assert_eq!(stats.success_rate(), None);
        assert_eq!(stats.cancel_rate(), None);

        let stats = WaitStats {
            joined: 4,
            promoted: 1,
            cancelled: 2,
            waiting: 1,
        };
        assert_eq!(stats.success_rate(), Some(25.0));
        assert_eq!(stats.cancel_rate(), Some(50.0));
    }

    #[test]
    fn test_zero_capacity_event_is_always_full() {
        let mut fixture = Fixture::new(0);
        let user = fixture.user();

        assert!(fixture.state.is_full());
        assert!(fixture.run(EnrollmentCommand::Enroll { user }).is_err());
        assert!(fixture.run(EnrollmentCommand::JoinWait { user }).is_ok());
    }
}
