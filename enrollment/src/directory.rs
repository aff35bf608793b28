//! Event storage and search filters.
//!
//! The directory only holds event metadata. It never reads or changes
//! enrollment state, which lives in each event's engine.

use crate::types::{Category, Event, EventId, Money, UserId};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Pure predicate over event metadata
pub trait EventFilter: Send + Sync {
    /// Whether `event` passes the filter
    fn matches(&self, event: &Event) -> bool;
}

/// Title contains the keyword (case-sensitive)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keyword(pub String);

impl Keyword {
    /// Creates a new `Keyword` filter
    #[must_use]
    pub fn new(keyword: impl Into<String>) -> Self {
        Self(keyword.into())
    }
}

impl EventFilter for Keyword {
    fn matches(&self, event: &Event) -> bool {
        event.title.contains(&self.0)
    }
}

/// Event date strictly before the given date
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Before(pub NaiveDate);

impl EventFilter for Before {
    fn matches(&self, event: &Event) -> bool {
        event.date < self.0
    }
}

/// Event date strictly after the given date
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct After(pub NaiveDate);

impl EventFilter for After {
    fn matches(&self, event: &Event) -> bool {
        event.date > self.0
    }
}

/// Event tagged with the category
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HasCategory(pub Category);

impl EventFilter for HasCategory {
    fn matches(&self, event: &Event) -> bool {
        event.has_category(self.0)
    }
}

/// Price at or above the bound
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MinPrice(pub Money);

impl EventFilter for MinPrice {
    fn matches(&self, event: &Event) -> bool {
        event.price >= self.0
    }
}

/// Price at or below the bound
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaxPrice(pub Money);

impl EventFilter for MaxPrice {
    fn matches(&self, event: &Event) -> bool {
        event.price <= self.0
    }
}

/// Conjunction of filters; an empty conjunction matches everything
#[derive(Default)]
pub struct All(Vec<Box<dyn EventFilter>>);

impl All {
    /// Creates an empty conjunction
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter
    #[must_use]
    pub fn and(mut self, filter: impl EventFilter + 'static) -> Self {
        self.0.push(Box::new(filter));
        self
    }
}

impl EventFilter for All {
    fn matches(&self, event: &Event) -> bool {
        self.0.iter().all(|filter| filter.matches(event))
    }
}

/// In-memory event store keyed by [`EventId`]
#[derive(Clone, Debug, Default)]
pub struct EventDirectory {
    events: HashMap<EventId, Event>,
}

impl EventDirectory {
    /// Creates an empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an event
    ///
    /// Returns `false` and keeps the existing entry if the id is taken.
    pub fn insert(&mut self, event: Event) -> bool {
        if self.events.contains_key(&event.id) {
            return false;
        }
        self.events.insert(event.id, event);
        true
    }

    /// Look up an event
    #[must_use]
    pub fn get(&self, id: &EventId) -> Option<&Event> {
        self.events.get(id)
    }

    /// Whether the event is stored
    #[must_use]
    pub fn contains(&self, id: &EventId) -> bool {
        self.events.contains_key(id)
    }

    /// All events, by date then title
    #[must_use]
    pub fn events(&self) -> Vec<&Event> {
        self.sorted(|_| true)
    }

    /// Events passing `filter`, by date then title
    #[must_use]
    pub fn filtered(&self, filter: &dyn EventFilter) -> Vec<&Event> {
        self.sorted(|event| filter.matches(event))
    }

    /// Events organized by `user`, by date then title
    #[must_use]
    pub fn organized_by(&self, user: &UserId) -> Vec<&Event> {
        self.sorted(|event| event.organizer == *user)
    }

    /// Number of stored events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the directory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn sorted(&self, keep: impl Fn(&Event) -> bool) -> Vec<&Event> {
        let mut events: Vec<&Event> = self.events.values().filter(|event| keep(event)).collect();
        events.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.title.cmp(&b.title)));
        events
    }
}
