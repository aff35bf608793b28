//! Per-user membership bookkeeping.
//!
//! A [`UserMembership`] records which events a user is enrolled in or waiting
//! for, and rejects a second involvement with the same event. Memberships are
//! stored in a [`MembershipRegistry`] keyed by [`UserId`]; events refer to
//! users by identifier only.
//!
//! # Locking
//!
//! Each user has its own mutex. The registry map is behind a read-write lock
//! that is only written when a user is registered, so transitions on different
//! events contend only when they touch the same user, and then only for the
//! duration of a set insert or remove.
//!
//! Membership for a given `(user, event)` pair is changed exclusively by that
//! event's engine while it holds the event lock. Callers must acquire the
//! event lock first and must never hold two user locks at once.

use crate::types::{EventId, Involvement, User, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Why a membership update was rejected
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipError {
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

    /// The mark being removed is not there
    #[error("User {user} is not {expected} for event {event}")]
    NotPresent {
        /// User
        user: UserId,
        /// Event
        event: EventId,
        /// The mark that was expected
        expected: Involvement,
    },

    /// No membership is registered for the user
    #[error("Unknown user {0}")]
    UnknownUser(UserId),
}

/// Read access to memberships, injected into the enrollment reducer
pub trait MembershipQuery: Send + Sync {
    /// Where `user` stands with respect to `event`
    ///
    /// Unknown users are reported as [`Involvement::None`].
    fn involvement(&self, user: &UserId, event: &EventId) -> Involvement;
}

// ============================================================================
// UserMembership
// ============================================================================

/// Which events a single user is involved in
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMembership {
    user: UserId,
    enrolled_in: HashSet<EventId>,
    waiting_for: HashSet<EventId>,
    organized: HashSet<EventId>,
}

impl UserMembership {
    /// Empty membership for `user`
    #[must_use]
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            enrolled_in: HashSet::new(),
            waiting_for: HashSet::new(),
            organized: HashSet::new(),
        }
    }

    /// Owner of this membership
    #[must_use]
    pub const fn user(&self) -> UserId {
        self.user
    }

    /// Where this user stands with respect to `event`
    #[must_use]
    pub fn involvement(&self, event: &EventId) -> Involvement {
        if self.enrolled_in.contains(event) {
            Involvement::Enrolled
        } else if self.waiting_for.contains(event) {
            Involvement::Waiting
        } else {
            Involvement::None
        }
    }

    /// Enrolled in or waiting for `event`
    #[must_use]
    pub fn is_involved(&self, event: &EventId) -> bool {
        self.involvement(event).is_involved()
    }

    /// Events the user is enrolled in
    pub fn enrolled_in(&self) -> impl Iterator<Item = &EventId> {
        self.enrolled_in.iter()
    }

    /// Events the user is waiting for
    pub fn waiting_for(&self) -> impl Iterator<Item = &EventId> {
        self.waiting_for.iter()
    }

    /// Events the user organizes
    pub fn organized(&self) -> impl Iterator<Item = &EventId> {
        self.organized.iter()
    }

    /// Record the enrolled mark
    ///
    /// # Errors
    ///
    /// [`MembershipError::AlreadyInvolved`] if the user is enrolled or waiting.
    pub fn mark_enrolled(&mut self, event: EventId) -> Result<(), MembershipError> {
        self.ensure_uninvolved(event)?;
        self.enrolled_in.insert(event);
        Ok(())
    }

    /// Record the waiting mark
    ///
    /// # Errors
    ///
    /// [`MembershipError::AlreadyInvolved`] if the user is enrolled or waiting.
    pub fn mark_waiting(&mut self, event: EventId) -> Result<(), MembershipError> {
        self.ensure_uninvolved(event)?;
        self.waiting_for.insert(event);
        Ok(())
    }

    /// Remove the enrolled mark
    ///
    /// # Errors
    ///
    /// [`MembershipError::NotPresent`] if the user is not enrolled.
    pub fn unmark_enrolled(&mut self, event: EventId) -> Result<(), MembershipError> {
        if self.enrolled_in.remove(&event) {
            Ok(())
        } else {
            Err(self.not_present(event, Involvement::Enrolled))
        }
    }

    /// Remove the waiting mark
    ///
    /// # Errors
    ///
    /// [`MembershipError::NotPresent`] if the user is not waiting.
    pub fn unmark_waiting(&mut self, event: EventId) -> Result<(), MembershipError> {
        if self.waiting_for.remove(&event) {
            Ok(())
        } else {
            Err(self.not_present(event, Involvement::Waiting))
        }
    }

    /// Move the user from waiting to enrolled in one step
    ///
    /// # Errors
    ///
    /// [`MembershipError::NotPresent`] if the user is not waiting.
    pub fn promote(&mut self, event: EventId) -> Result<(), MembershipError> {
        self.unmark_waiting(event)?;
        self.enrolled_in.insert(event);
        Ok(())
    }

    /// Undo [`UserMembership::promote`]
    ///
    /// # Errors
    ///
    /// [`MembershipError::NotPresent`] if the user is not enrolled.
    pub fn demote(&mut self, event: EventId) -> Result<(), MembershipError> {
        self.unmark_enrolled(event)?;
        self.waiting_for.insert(event);
        Ok(())
    }

    /// Record that the user organizes `event`
    ///
    /// Returns `false` if it was already recorded.
    pub fn record_organized(&mut self, event: EventId) -> bool {
        self.organized.insert(event)
    }

    /// Apply a single change
    ///
    /// # Errors
    ///
    /// Whatever the underlying mark/unmark operation rejects.
    pub(crate) fn apply(&mut self, op: MembershipOp, event: EventId) -> Result<(), MembershipError> {
        match op {
            MembershipOp::MarkEnrolled => self.mark_enrolled(event),
            MembershipOp::UnmarkEnrolled => self.unmark_enrolled(event),
            MembershipOp::MarkWaiting => self.mark_waiting(event),
            MembershipOp::UnmarkWaiting => self.unmark_waiting(event),
            MembershipOp::Promote => self.promote(event),
            MembershipOp::Demote => self.demote(event),
        }
    }

    fn ensure_uninvolved(&self, event: EventId) -> Result<(), MembershipError> {
        match self.involvement(&event) {
            Involvement::None => Ok(()),
            involvement => Err(MembershipError::AlreadyInvolved {
                user: self.user,
                event,
                involvement,
            }),
        }
    }

    const fn not_present(&self, event: EventId, expected: Involvement) -> MembershipError {
        MembershipError::NotPresent {
            user: self.user,
            event,
            expected,
        }
    }
}

// ============================================================================
// Changes
// ============================================================================

/// A single membership mutation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum MembershipOp {
    /// `None -> Enrolled`
    MarkEnrolled,
    /// `Enrolled -> None`
    UnmarkEnrolled,
    /// `None -> Waiting`
    MarkWaiting,
    /// `Waiting -> None`
    UnmarkWaiting,
    /// `Waiting -> Enrolled`
    Promote,
    /// `Enrolled -> Waiting` (rollback only)
    Demote,
}

impl MembershipOp {
    /// The operation that undoes this one
    #[must_use]
    pub(crate) const fn inverse(self) -> Self {
        match self {
            Self::MarkEnrolled => Self::UnmarkEnrolled,
            Self::UnmarkEnrolled => Self::MarkEnrolled,
            Self::MarkWaiting => Self::UnmarkWaiting,
            Self::UnmarkWaiting => Self::MarkWaiting,
            Self::Promote => Self::Demote,
            Self::Demote => Self::Promote,
        }
    }
}

/// A membership mutation bound to a `(user, event)` pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct MembershipChange {
    pub(crate) user: UserId,
    pub(crate) event: EventId,
    pub(crate) op: MembershipOp,
}

impl MembershipChange {
    /// Creates a new `MembershipChange`
    #[must_use]
    pub(crate) const fn new(user: UserId, event: EventId, op: MembershipOp) -> Self {
        Self { user, event, op }
    }

    /// The change that undoes this one
    #[must_use]
    pub(crate) const fn inverse(self) -> Self {
        Self {
            op: self.op.inverse(),
            ..self
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug)]
struct UserEntry {
    name: String,
    membership: Arc<Mutex<UserMembership>>,
}

/// Arena of users and their memberships
///
/// Outside this crate the registry can register users and be read, never
/// written. Marks change only inside an engine transition:
///
/// ```compile_fail
/// use enrollment::{EventId, MembershipRegistry, User};
///
/// let registry = MembershipRegistry::new();
/// let user = User::new("ana");
/// registry.register(&user);
/// registry.record_organized(&user.id, EventId::new()).ok();
/// ```
///
/// ```compile_fail
/// use enrollment::membership::{MembershipChange, MembershipOp};
/// ```
#[derive(Debug, Default)]
pub struct MembershipRegistry {
    users: RwLock<HashMap<UserId, UserEntry>>,
}

impl MembershipRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with an empty membership
    ///
    /// Returns `false` (and leaves the existing membership alone) if the user
    /// is already registered.
    pub fn register(&self, user: &User) -> bool {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if users.contains_key(&user.id) {
            return false;
        }
        users.insert(
            user.id,
            UserEntry {
                name: user.name.clone(),
                membership: Arc::new(Mutex::new(UserMembership::new(user.id))),
            },
        );
        true
    }

    /// Whether `user` is registered
    #[must_use]
    pub fn contains(&self, user: &UserId) -> bool {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(user)
    }

    /// Display name of `user`
    #[must_use]
    pub fn name(&self, user: &UserId) -> Option<String> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .map(|entry| entry.name.clone())
    }

    /// Number of registered users
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no user is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of a user's membership
    #[must_use]
    pub fn snapshot(&self, user: &UserId) -> Option<UserMembership> {
        self.handle(user).map(|membership| {
            membership
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }

    /// Record that `user` organizes `event`
    ///
    /// # Errors
    ///
    /// [`MembershipError::UnknownUser`] if the user is not registered.
    pub(crate) fn record_organized(&self, user: &UserId, event: EventId) -> Result<bool, MembershipError> {
        let membership = self.handle(user).ok_or(MembershipError::UnknownUser(*user))?;
        let recorded = membership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_organized(event);
        Ok(recorded)
    }

    /// Apply one change
    ///
    /// # Errors
    ///
    /// [`MembershipError::UnknownUser`] or whatever the membership rejects.
    pub(crate) fn apply(&self, change: MembershipChange) -> Result<(), MembershipError> {
        let membership = self
            .handle(&change.user)
            .ok_or(MembershipError::UnknownUser(change.user))?;
        let mut membership = membership.lock().unwrap_or_else(PoisonError::into_inner);
        membership.apply(change.op, change.event)
    }

    /// Apply a batch of changes, all or nothing
    ///
    /// Changes are applied in order, one user lock at a time. If one is
    /// rejected, the changes already applied are undone in reverse order and
    /// the rejection is returned.
    ///
    /// # Errors
    ///
    /// The first rejection encountered.
    pub(crate) fn apply_all(&self, changes: &[MembershipChange]) -> Result<(), MembershipError> {
        for (applied, change) in changes.iter().enumerate() {
            if let Err(error) = self.apply(*change) {
                for undo in changes[..applied].iter().rev() {
                    if let Err(rollback_error) = self.apply(undo.inverse()) {
                        tracing::error!(
                            user = %undo.user,
                            event = %undo.event,
                            op = ?undo.op,
                            error = %rollback_error,
                            "Failed to roll back membership change"
                        );
                    }
                }
                return Err(error);
            }
        }
        Ok(())
    }

    fn handle(&self, user: &UserId) -> Option<Arc<Mutex<UserMembership>>> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .map(|entry| Arc::clone(&entry.membership))
    }
}

impl MembershipQuery for MembershipRegistry {
    fn involvement(&self, user: &UserId, event: &EventId) -> Involvement {
        self.handle(user).map_or(Involvement::None, |membership| {
            membership
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .involvement(event)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks_are_exclusive() {
        let user = UserId::new();
        let event = EventId::new();
        let mut membership = UserMembership::new(user);

        membership.mark_enrolled(event).unwrap();
        assert_eq!(membership.involvement(&event), Involvement::Enrolled);

        let error = membership.mark_waiting(event).unwrap_err();
        assert_eq!(
            error,
            MembershipError::AlreadyInvolved {
                user,
                event,
                involvement: Involvement::Enrolled,
            }
        );
        assert!(membership.mark_enrolled(event).is_err());
        assert_eq!(membership.waiting_for().count(), 0);
    }

    #[test]
    fn test_unmark_requires_presence() {
        let user = UserId::new();
        let event = EventId::new();
        let mut membership = UserMembership::new(user);

        assert_eq!(
            membership.unmark_enrolled(event),
            Err(MembershipError::NotPresent {
                user,
                event,
                expected: Involvement::Enrolled,
            })
        );

        membership.mark_waiting(event).unwrap();
        assert!(membership.unmark_enrolled(event).is_err());
        membership.unmark_waiting(event).unwrap();
        assert!(!membership.is_involved(&event));
    }

    #[test]
    fn test_promote_moves_waiting_to_enrolled() {
        let event = EventId::new();
        let mut membership = UserMembership::new(UserId::new());

        assert!(membership.promote(event).is_err());

        membership.mark_waiting(event).unwrap();
        membership.promote(event).unwrap();
        assert_eq!(membership.involvement(&event), Involvement::Enrolled);

        membership.demote(event).unwrap();
        assert_eq!(membership.involvement(&event), Involvement::Waiting);
    }

    #[test]
    fn test_marks_on_different_events_are_independent() {
        let mut membership = UserMembership::new(UserId::new());
        let first = EventId::new();
        let second = EventId::new();

        membership.mark_enrolled(first).unwrap();
        membership.mark_waiting(second).unwrap();

        assert_eq!(membership.involvement(&first), Involvement::Enrolled);
        assert_eq!(membership.involvement(&second), Involvement::Waiting);
    }

    #[test]
    fn test_every_op_is_undone_by_its_inverse() {
        let ops = [
            MembershipOp::MarkEnrolled,
            MembershipOp::UnmarkEnrolled,
            MembershipOp::MarkWaiting,
            MembershipOp::UnmarkWaiting,
            MembershipOp::Promote,
            MembershipOp::Demote,
        ];
        for op in ops {
            assert_eq!(op.inverse().inverse(), op);
            assert_ne!(op.inverse(), op);
        }
    }

    #[test]
    fn test_registry_apply_all_rolls_back_on_rejection() {
        let registry = MembershipRegistry::new();
        let leaving = User::new("leaving");
        let waiting = User::new("waiting");
        registry.register(&leaving);
        registry.register(&waiting);
        let event = EventId::new();

        registry
            .apply(MembershipChange::new(leaving.id, event, MembershipOp::MarkEnrolled))
            .unwrap();

        // `waiting` never joined the queue, so the promotion is rejected
        let result = registry.apply_all(&[
            MembershipChange::new(leaving.id, event, MembershipOp::UnmarkEnrolled),
            MembershipChange::new(waiting.id, event, MembershipOp::Promote),
        ]);

        assert!(matches!(result, Err(MembershipError::NotPresent { .. })));
        assert_eq!(registry.involvement(&leaving.id, &event), Involvement::Enrolled);
        assert_eq!(registry.involvement(&waiting.id, &event), Involvement::None);
    }

    #[test]
    fn test_registry_unknown_user() {
        let registry = MembershipRegistry::new();
        let stranger = UserId::new();
        let event = EventId::new();

        assert_eq!(registry.involvement(&stranger, &event), Involvement::None);
        assert_eq!(
            registry.apply(MembershipChange::new(stranger, event, MembershipOp::MarkWaiting)),
            Err(MembershipError::UnknownUser(stranger))
        );
        assert!(registry.snapshot(&stranger).is_none());
    }

    #[test]
    fn test_registry_register_is_idempotent() {
        let registry = MembershipRegistry::new();
        let user = User::new("ana");
        let event = EventId::new();

        assert!(registry.register(&user));
        registry
            .apply(MembershipChange::new(user.id, event, MembershipOp::MarkWaiting))
            .unwrap();
        assert!(!registry.register(&user));

        assert_eq!(registry.involvement(&user.id, &event), Involvement::Waiting);
        assert_eq!(registry.name(&user.id).as_deref(), Some("ana"));
        assert_eq!(registry.len(), 1);
    }
}
