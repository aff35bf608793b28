//! Domain types for event enrollment.
//!
//! Identifiers, value objects, event metadata and the two immutable records
//! produced by the enrollment state machine ([`WaitEntry`] and
//! [`EnrollmentRecord`]).

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Value Objects
// ============================================================================

/// Maximum number of confirmed enrollments for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capacity(pub u32);

impl Capacity {
    /// Creates a new `Capacity`
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the capacity value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Returns the capacity as a collection size
    #[must_use]
    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Free admission
    pub const FREE: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from whole units, `None` on overflow
    #[must_use]
    pub const fn checked_from_dollars(dollars: u64) -> Option<Self> {
        match dollars.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Returns the amount in whole units (rounded down)
    #[must_use]
    pub const fn dollars(&self) -> u64 {
        self.0 / 100
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.dollars(), self.0 % 100)
    }
}

/// Kind of event, used by directory filters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Party
    Party,
    /// Concert
    Concert,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Party => write!(f, "party"),
            Self::Concert => write!(f, "concert"),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A registered user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier
    pub id: UserId,
    /// Display name
    pub name: String,
}

impl User {
    /// Creates a new user with a fresh identifier
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
        }
    }
}

/// Event metadata
///
/// Immutable once built. The mutable enrollment state lives in the event's
/// engine, never here. Building an `Event` has no effect on any other entity;
/// registering it with its organizer is a separate step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier
    pub id: EventId,
    /// User organizing the event
    pub organizer: UserId,
    /// Title (searched by keyword filters)
    pub title: String,
    /// Free-form description
    pub description: String,
    /// Calendar date
    pub date: NaiveDate,
    /// Start time
    pub starts_at: DateTime<Utc>,
    /// Planned length
    pub duration: Duration,
    /// Maximum number of enrollments
    pub capacity: Capacity,
    /// Advisory minimum attendance. Stored, never enforced.
    pub min_capacity: Option<Capacity>,
    /// Admission price
    pub price: Money,
    /// Categories the event belongs to
    pub categories: Vec<Category>,
}

impl Event {
    /// Start building an event
    #[must_use]
    pub fn builder(
        organizer: UserId,
        title: impl Into<String>,
        date: NaiveDate,
        capacity: Capacity,
    ) -> EventBuilder {
        EventBuilder {
            event: Self {
                id: EventId::new(),
                organizer,
                title: title.into(),
                description: String::new(),
                date,
                starts_at: date.and_time(NaiveTime::MIN).and_utc(),
                duration: Duration::ZERO,
                capacity,
                min_capacity: None,
                price: Money::FREE,
                categories: Vec::new(),
            },
        }
    }

    /// Whether the event is tagged with `category`
    #[must_use]
    pub fn has_category(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }
}

/// Builder for [`Event`]
#[derive(Clone, Debug)]
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    /// Set the description
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.event.description = description.into();
        self
    }

    /// Set the start time (defaults to midnight UTC on the event date)
    #[must_use]
    pub const fn starts_at(mut self, starts_at: DateTime<Utc>) -> Self {
        self.event.starts_at = starts_at;
        self
    }

    /// Set the planned length
    #[must_use]
    pub const fn duration(mut self, duration: Duration) -> Self {
        self.event.duration = duration;
        self
    }

    /// Set the advisory minimum attendance
    #[must_use]
    pub const fn min_capacity(mut self, min_capacity: Capacity) -> Self {
        self.event.min_capacity = Some(min_capacity);
        self
    }

    /// Set the admission price
    #[must_use]
    pub const fn price(mut self, price: Money) -> Self {
        self.event.price = price;
        self
    }

    /// Tag the event with a category
    #[must_use]
    pub fn category(mut self, category: Category) -> Self {
        if !self.event.categories.contains(&category) {
            self.event.categories.push(category);
        }
        self
    }

    /// Finish building
    #[must_use]
    pub fn build(self) -> Event {
        self.event
    }
}

// ============================================================================
// Enrollment Records
// ============================================================================

/// Where a user stands with respect to one event
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Involvement {
    /// Neither enrolled nor waiting
    #[default]
    None,
    /// Holds one of the event's capacity slots
    Enrolled,
    /// Queued for a slot
    Waiting,
}

impl Involvement {
    /// Whether the user is enrolled or waiting
    #[must_use]
    pub const fn is_involved(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for Involvement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "not involved"),
            Self::Enrolled => write!(f, "enrolled"),
            Self::Waiting => write!(f, "waiting"),
        }
    }
}

/// A user's place in an event's wait queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitEntry {
    /// Waiting user
    pub user: UserId,
    /// Event waited for
    pub event: EventId,
    /// When the user joined the queue
    pub joined_at: DateTime<Utc>,
}

impl WaitEntry {
    /// Creates a new `WaitEntry`
    #[must_use]
    pub const fn new(user: UserId, event: EventId, joined_at: DateTime<Utc>) -> Self {
        Self {
            user,
            event,
            joined_at,
        }
    }

    /// Time spent waiting as of `now`
    ///
    /// Clamped at zero if `now` precedes the join time.
    #[must_use]
    pub fn waited_until(&self, now: DateTime<Utc>) -> Duration {
        (now - self.joined_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// A confirmed, capacity-counted enrollment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    /// Enrolled user
    pub user: UserId,
    /// Event enrolled in
    pub event: EventId,
    /// When the enrollment was confirmed
    pub enrolled_at: DateTime<Utc>,
    /// Wait experienced before promotion; `None` for direct enrollments
    pub waited: Option<Duration>,
}

impl EnrollmentRecord {
    /// Enrollment taken while capacity was available
    #[must_use]
    pub const fn direct(user: UserId, event: EventId, enrolled_at: DateTime<Utc>) -> Self {
        Self {
            user,
            event,
            enrolled_at,
            waited: None,
        }
    }

    /// Enrollment granted by promotion from the wait queue
    #[must_use]
    pub const fn promoted(
        user: UserId,
        event: EventId,
        enrolled_at: DateTime<Utc>,
        waited: Duration,
    ) -> Self {
        Self {
            user,
            event,
            enrolled_at,
            waited: Some(waited),
        }
    }

    /// Whether this enrollment came from the wait queue
    #[must_use]
    pub const fn was_promoted(&self) -> bool {
        self.waited.is_some()
    }
}
