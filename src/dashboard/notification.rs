use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

/// Where a notification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOrigin {
    /// `emergency` frame pushed by the relay
    Relay,
    /// Operator used a marker's "simulate emergency" action
    Simulated,
}

/// Dashboard-local projection of an emergency.
///
/// Immutable once created; the stores only ever remove it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Time-ordered (UUIDv7) so ids sort by creation
    pub id: Uuid,
    pub stop_id: u64,
    pub stop_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    pub origin: NotificationOrigin,
}

impl Notification {
    pub fn new(
        stop_id: u64,
        stop_name: impl Into<String>,
        coordinates: Option<(f64, f64)>,
        timestamp: DateTime<Utc>,
        origin: NotificationOrigin,
    ) -> Self {
        let stop_name = stop_name.into();
        Self {
            id: Uuid::now_v7(),
            stop_id,
            message: format!("Emergency button pressed at {}", stop_name),
            stop_name,
            timestamp,
            lat: coordinates.map(|(lat, _)| lat),
            lng: coordinates.map(|(_, lng)| lng),
            origin,
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.lat.zip(self.lng)
    }
}

/// Live stack plus session history.
///
/// Both lists are most-recent-first by insertion order. The live stack is
/// capped and silently evicts its oldest entry; history is never trimmed
/// except by `clear_history`.
#[derive(Debug)]
pub struct NotificationStore {
    capacity: usize,
    live: VecDeque<Notification>,
    history: VecDeque<Notification>,
}

impl NotificationStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            live: VecDeque::with_capacity(capacity),
            history: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Front-insert into both lists. Returns the entry evicted from the live
    /// stack, if any.
    pub fn insert(&mut self, notification: Notification) -> Option<Notification> {
        self.history.push_front(notification.clone());
        self.live.push_front(notification);
        if self.live.len() > self.capacity {
            self.live.pop_back()
        } else {
            None
        }
    }

    /// Remove from the live stack. History keeps the entry.
    pub fn dismiss(&mut self, id: Uuid) -> Option<Notification> {
        let index = self.live.iter().position(|n| n.id == id)?;
        self.live.remove(index)
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn live(&self) -> impl Iterator<Item = &Notification> {
        self.live.iter()
    }

    pub fn history(&self) -> impl Iterator<Item = &Notification> {
        self.history.iter()
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn is_live(&self, id: Uuid) -> bool {
        self.live.iter().any(|n| n.id == id)
    }
}
