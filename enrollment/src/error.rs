//! Enrollment errors.
//!
//! [`EnrollmentError`] is the complete set of ways a transition can be
//! refused. Every refusal leaves both the event and the user's membership
//! exactly as they were.
//!
//! [`EngineError`] adds the one failure an engine reports before deciding
//! anything: a user the membership registry has never heard of.
//!
//! [`InvariantViolation`] is not a refusal: it means the event side and the
//! membership side disagree, which the engine treats as fatal.

use crate::types::{EventId, Involvement, UserId};
use thiserror::Error;

/// Why a transition was refused
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentError {
    /// Enrollment attempted on a full event
    #[error("Event {event} is full ({capacity} enrolled)")]
    CapacityExceeded {
        /// Event that is full
        event: EventId,
        /// Its capacity
        capacity: u32,
    },

    /// Wait queue join attempted while slots are still free
    #[error("Event {event} still has free slots, enroll instead of waiting")]
    CapacityAvailable {
        /// Event with free slots
        event: EventId,
    },

    /// The user is already enrolled in or waiting for the event
    #[error("User {user} is already {involvement} for event {event}")]
    AlreadyInvolved {
        /// User
        user: UserId,
        /// Event
        event: EventId,
        /// Current involvement
        involvement: Involvement,
    },

    /// Cancellation attempted without an enrollment
    #[error("User {user} is not enrolled in event {event}")]
    NotEnrolled {
        /// User
        user: UserId,
        /// Event
        event: EventId,
    },

    /// Wait cancellation attempted without a wait entry
    #[error("User {user} is not waiting for event {event}")]
    NotWaiting {
        /// User
        user: UserId,
        /// Event
        event: EventId,
    },
}

/// The event side and the membership side disagree about a user
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "Membership out of sync for user {user} on event {event}: event records {event_side}, membership records {membership_side}"
)]
pub struct InvariantViolation {
    /// User whose records disagree
    pub user: UserId,
    /// Event whose records disagree
    pub event: EventId,
    /// What the event's own collections say
    pub event_side: Involvement,
    /// What the user's membership says
    pub membership_side: Involvement,
}

/// Outcome of a refused decision
///
/// Separates ordinary refusals from broken invariants so the runtime can
/// surface the former and abort on the latter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The command is invalid for the current state
    #[error(transparent)]
    Rejected(#[from] EnrollmentError),

    /// The state is corrupt
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

impl TransitionError {
    /// The refusal, if this is one
    #[must_use]
    pub const fn rejection(&self) -> Option<EnrollmentError> {
        match self {
            Self::Rejected(error) => Some(*error),
            Self::Invariant(_) => None,
        }
    }
}

/// Why an engine did not run a transition
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// The user is not registered with the engine's membership registry
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    /// The transition was refused
    #[error(transparent)]
    Rejected(#[from] EnrollmentError),
}

impl EngineError {
    /// The refusal, if this is one
    #[must_use]
    pub const fn rejection(&self) -> Option<EnrollmentError> {
        match self {
            Self::Rejected(error) => Some(*error),
            Self::UnknownUser(_) => None,
        }
    }
}
