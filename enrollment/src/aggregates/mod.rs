//! Aggregates for event enrollment.
//!
//! - [`enrollment`]: capacity, FIFO wait queue and promotion for one event

pub mod enrollment;

pub use enrollment::{
    EnrollmentCommand, EnrollmentEnvironment, EnrollmentEvent, EnrollmentReducer,
    EnrollmentSnapshot, EnrollmentState, WaitStats,
};
