//! Enrollment service.
//!
//! Arena of users, events and per-event engines. Everything refers to
//! everything else by identifier; lookups go through the registries held
//! here.
//!
//! Creating an [`Event`] value has no side effects. [`EnrollmentService::register_event`]
//! is the explicit step that stores it, starts its engine and records it on
//! the organizer's membership.

use crate::aggregates::{EnrollmentSnapshot, WaitStats};
use crate::directory::{EventDirectory, EventFilter};
use crate::engine::{EnrollmentEngine, EventEngine, Transition};
use crate::error::{EngineError, EnrollmentError};
use crate::membership::{MembershipQuery, MembershipRegistry, UserMembership};
use crate::types::{Event, EventId, User, UserId};
use enrollment_core::environment::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Service errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// No user with this id is registered
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    /// No event with this id is registered
    #[error("Unknown event: {0}")]
    UnknownEvent(EventId),

    /// An event with this id is already registered
    #[error("Event already registered: {0}")]
    DuplicateEvent(EventId),

    /// Events must have at least one slot
    #[error("Event {0} has zero capacity")]
    ZeroCapacity(EventId),

    /// The transition was refused
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
}

impl From<EngineError> for ServiceError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::UnknownUser(user) => Self::UnknownUser(user),
            EngineError::Rejected(error) => Self::Enrollment(error),
        }
    }
}

/// Events a user is involved with, by date then title
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEvents {
    /// Events the user holds a slot in
    pub enrolled: Vec<Event>,
    /// Events the user is queued for
    pub waiting: Vec<Event>,
    /// Events the user organizes
    pub organized: Vec<Event>,
}

/// Users, events and their engines
pub struct EnrollmentService {
    clock: Arc<dyn Clock>,
    membership: Arc<MembershipRegistry>,
    directory: RwLock<EventDirectory>,
    engines: RwLock<HashMap<EventId, Arc<dyn EnrollmentEngine>>>,
}

impl Default for EnrollmentService {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl EnrollmentService {
    /// Creates an empty service using `clock` for every engine
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            membership: Arc::new(MembershipRegistry::new()),
            directory: RwLock::new(EventDirectory::new()),
            engines: RwLock::new(HashMap::new()),
        }
    }

    /// Read-only view of every user's membership
    ///
    /// Marks change only through the transitions below:
    ///
    /// ```compile_fail
    /// use enrollment::EnrollmentService;
    ///
    /// let service = EnrollmentService::default();
    /// service.membership().apply_all(&[]).ok();
    /// ```
    #[must_use]
    pub fn membership(&self) -> &dyn MembershipQuery {
        self.membership.as_ref()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a user
    ///
    /// Returns `false` if the user was already registered.
    pub fn register_user(&self, user: &User) -> bool {
        let registered = self.membership.register(user);
        if registered {
            tracing::debug!(user = %user.id, name = %user.name, "User registered");
        }
        registered
    }

    /// Store an event, start its engine and record it on its organizer
    ///
    /// # Errors
    ///
    /// - [`ServiceError::UnknownUser`]: the organizer is not registered
    /// - [`ServiceError::ZeroCapacity`]: the event has no slots
    /// - [`ServiceError::DuplicateEvent`]: the id is already registered
    #[tracing::instrument(skip_all, fields(event = %event.id, organizer = %event.organizer))]
    pub fn register_event(&self, event: Event) -> Result<Arc<dyn EnrollmentEngine>, ServiceError> {
        if !self.membership.contains(&event.organizer) {
            return Err(ServiceError::UnknownUser(event.organizer));
        }
        if event.capacity.value() == 0 {
            return Err(ServiceError::ZeroCapacity(event.id));
        }

        let engine: Arc<dyn EnrollmentEngine> =
            Arc::new(EventEngine::new(&event, self.clock.clone(), self.membership.clone()));
        let (id, organizer, capacity) = (event.id, event.organizer, event.capacity);

        {
            let mut directory = self.directory.write().unwrap_or_else(PoisonError::into_inner);
            if !directory.insert(event) {
                return Err(ServiceError::DuplicateEvent(id));
            }
            self.engines
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, engine.clone());
        }

        self.membership
            .record_organized(&organizer, id)
            .map_err(|_| ServiceError::UnknownUser(organizer))?;
        tracing::info!(%capacity, "Event registered");
        Ok(engine)
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Engine of a registered event
    ///
    /// # Errors
    ///
    /// [`ServiceError::UnknownEvent`].
    pub fn engine(&self, event: &EventId) -> Result<Arc<dyn EnrollmentEngine>, ServiceError> {
        self.engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
            .ok_or(ServiceError::UnknownEvent(*event))
    }

    /// Metadata of a registered event
    #[must_use]
    pub fn event(&self, event: &EventId) -> Option<Event> {
        self.directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
    }

    /// Copy of a user's membership
    ///
    /// # Errors
    ///
    /// [`ServiceError::UnknownUser`].
    pub fn user_membership(&self, user: &UserId) -> Result<UserMembership, ServiceError> {
        self.membership
            .snapshot(user)
            .ok_or(ServiceError::UnknownUser(*user))
    }

    /// Events `user` is enrolled in, waiting for and organizing
    ///
    /// # Errors
    ///
    /// [`ServiceError::UnknownUser`].
    pub fn events_for(&self, user: &UserId) -> Result<UserEvents, ServiceError> {
        let membership = self.user_membership(user)?;
        let directory = self.directory.read().unwrap_or_else(PoisonError::into_inner);

        Ok(UserEvents {
            enrolled: sorted_events(&directory, membership.enrolled_in()),
            waiting: sorted_events(&directory, membership.waiting_for()),
            organized: sorted_events(&directory, membership.organized()),
        })
    }

    /// Events passing `filter`, by date then title
    #[must_use]
    pub fn search(&self, filter: &dyn EventFilter) -> Vec<Event> {
        self.directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .filtered(filter)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Wait counters of an event
    ///
    /// # Errors
    ///
    /// [`ServiceError::UnknownEvent`].
    pub fn stats(&self, event: &EventId) -> Result<WaitStats, ServiceError> {
        Ok(self.engine(event)?.stats())
    }

    /// Consistent copy of an event's enrollment state
    ///
    /// # Errors
    ///
    /// [`ServiceError::UnknownEvent`].
    pub fn snapshot(&self, event: &EventId) -> Result<EnrollmentSnapshot, ServiceError> {
        Ok(self.engine(event)?.snapshot())
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Enroll `user` in `event`
    ///
    /// # Errors
    ///
    /// Unknown ids, or the refusal from [`EnrollmentEngine::enroll`].
    pub fn enroll(&self, user: UserId, event: EventId) -> Result<Transition, ServiceError> {
        Ok(self.resolve(&user, &event)?.enroll(user)?)
    }

    /// Cancel `user`'s enrollment in `event`
    ///
    /// # Errors
    ///
    /// Unknown ids, or the refusal from [`EnrollmentEngine::cancel_enrollment`].
    pub fn cancel_enrollment(&self, user: UserId, event: EventId) -> Result<Transition, ServiceError> {
        Ok(self.resolve(&user, &event)?.cancel_enrollment(user)?)
    }

    /// Put `user` on `event`'s wait queue
    ///
    /// # Errors
    ///
    /// Unknown ids, or the refusal from [`EnrollmentEngine::join_wait`].
    pub fn join_wait(&self, user: UserId, event: EventId) -> Result<Transition, ServiceError> {
        Ok(self.resolve(&user, &event)?.join_wait(user)?)
    }

    /// Take `user` off `event`'s wait queue
    ///
    /// # Errors
    ///
    /// Unknown ids, or the refusal from [`EnrollmentEngine::cancel_wait`].
    pub fn cancel_wait(&self, user: UserId, event: EventId) -> Result<Transition, ServiceError> {
        Ok(self.resolve(&user, &event)?.cancel_wait(user)?)
    }

    fn resolve(&self, user: &UserId, event: &EventId) -> Result<Arc<dyn EnrollmentEngine>, ServiceError> {
        if !self.membership.contains(user) {
            return Err(ServiceError::UnknownUser(*user));
        }
        self.engine(event)
    }
}

fn sorted_events<'a>(directory: &EventDirectory, ids: impl Iterator<Item = &'a EventId>) -> Vec<Event> {
    let mut events: Vec<Event> = ids.filter_map(|id| directory.get(id).cloned()).collect();
    events.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.title.cmp(&b.title)));
    events
}
