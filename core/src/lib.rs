//! # Enrollment Core
//!
//! Core traits for building capacity-constrained enrollment state machines.
//!
//! The crate splits every state transition into two steps:
//!
//! - **decide**: validate a command against the current state and produce the
//!   events that describe what happened, without mutating anything
//! - **apply**: fold an already-decided event into the state (infallible)
//!
//! Runtimes that have to keep several pieces of state in lock-step (the event
//! side and the per-user membership side, for instance) decide first, commit
//! the external side effects, and only then apply the events. A failure
//! between the two steps never leaves the state half-applied.
//!
//! ## Core Concepts
//!
//! - **State**: Domain state owned by a single aggregate instance
//! - **Command**: A request to change state
//! - **Event**: A fact about a state change that has been accepted
//! - **Reducer**: `decide(&State, Command, &Env) -> Events` plus `apply(&mut State, &Event)`
//! - **Environment**: Injected dependencies (clock, read-only queries)
//!
//! ## Example
//!
//! ```ignore
//! use enrollment_core::reducer::Reducer;
//!
//! impl Reducer for SeatReducer {
//!     type State = SeatState;
//!     type Command = SeatCommand;
//!     type Event = SeatEvent;
//!     type Environment = SeatEnvironment;
//!     type Error = SeatError;
//!
//!     fn decide(&self, state: &SeatState, command: SeatCommand, env: &SeatEnvironment)
//!         -> Result<SmallVec<[SeatEvent; 4]>, SeatError> {
//!         // Validation goes here
//!         Ok(smallvec![])
//!     }
//!
//!     fn apply(&self, state: &mut SeatState, event: &SeatEvent) {
//!         // State mutation goes here
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{SmallVec, smallvec};

/// Reducer module - The core trait for business logic
pub mod reducer {
    use smallvec::SmallVec;

    /// Events produced by a single decision.
    ///
    /// Most transitions emit one event; a cancellation that promotes a
    /// waiting user emits two. Four slots keep every decision on the stack.
    pub type Decision<E> = SmallVec<[E; 4]>;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Command`: The requests this reducer validates
    /// - `Event`: The facts this reducer emits and folds into state
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Error`: Why a command was refused
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The command type this reducer validates
        type Command;

        /// The event type this reducer emits
        type Event;

        /// The environment type with injected dependencies
        type Environment;

        /// The refusal type returned by [`Reducer::decide`]
        type Error;

        /// Validate a command and describe its outcome as events.
        ///
        /// Must not mutate anything. Returning `Ok` commits the caller to
        /// applying every returned event, in order.
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the command is not valid for the
        /// current state.
        fn decide(
            &self,
            state: &Self::State,
            command: Self::Command,
            env: &Self::Environment,
        ) -> Result<Decision<Self::Event>, Self::Error>;

        /// Fold an accepted event into the state.
        fn apply(&self, state: &mut Self::State, event: &Self::Event);

        /// Decide and immediately apply.
        ///
        /// Convenience for callers with no external side to commit between
        /// the two steps.
        ///
        /// # Errors
        ///
        /// Propagates the error returned by [`Reducer::decide`]; the state is
        /// left untouched in that case.
        fn reduce(
            &self,
            state: &mut Self::State,
            command: Self::Command,
            env: &Self::Environment,
        ) -> Result<Decision<Self::Event>, Self::Error> {
            let events = self.decide(state, command, env)?;
            for event in &events {
                self.apply(state, event);
            }
            Ok(events)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use enrollment_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
