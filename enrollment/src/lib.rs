//! Event Enrollment - capacity-constrained enrollment with a FIFO waitlist
//!
//! Each event has a fixed number of slots. Once they are taken, further
//! requests join a first-in-first-out wait queue, and every cancellation
//! promotes the longest-waiting user into the freed slot.
//!
//! # Architecture
//!
//! ```text
//!              ┌────────────────────────┐
//!              │   EnrollmentService    │  users, events, engines by id
//!              └────────────────────────┘
//!                 │          │        │
//!                 ▼          ▼        ▼
//!        ┌──────────┐ ┌─────────────┐ ┌──────────────────┐
//!        │ Event    │ │ EventEngine │ │ Membership       │
//!        │ Directory│ │ (per event) │ │ Registry         │
//!        └──────────┘ └─────────────┘ └──────────────────┘
//!                            │              ▲
//!               decide ──────┤              │ batch of changes
//!                            ├──────────────┘
//!               apply  ──────┘
//! ```
//!
//! - [`aggregates::enrollment`]: the pure state machine (decide / apply)
//! - [`engine`]: per-event serialization and the membership commit
//! - [`membership`]: per-user "enrolled in / waiting for" bookkeeping
//! - [`directory`]: event metadata and search filters
//! - [`service`]: the arena tying them together
//!
//! # Key invariants
//!
//! ```text
//! |enrollments| <= capacity
//! a user is in at most one of {enrollments, wait queue} per event
//! promoted + cancelled + |wait queue| == joined
//! ```
//!
//! Refused transitions return an [`EnrollmentError`] and change nothing.
//! Membership is read-only outside the crate: only an engine transition
//! writes it.

#![forbid(unsafe_code)]

pub mod aggregates;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod membership;
pub mod metrics;
pub mod service;
pub mod types;

pub use aggregates::{
    EnrollmentCommand, EnrollmentEnvironment, EnrollmentEvent, EnrollmentReducer, EnrollmentSnapshot,
    EnrollmentState, WaitStats,
};
pub use config::{ConfigError, SimulationConfig};
pub use directory::{EventDirectory, EventFilter};
pub use engine::{EnrollmentEngine, EventEngine, Transition};
pub use error::{EngineError, EnrollmentError, InvariantViolation, TransitionError};
pub use membership::{MembershipQuery, MembershipRegistry, UserMembership};
pub use service::{EnrollmentService, ServiceError, UserEvents};
pub use types::{
    Capacity, Category, EnrollmentRecord, Event, EventBuilder, EventId, Involvement, Money, User, UserId,
    WaitEntry,
};
