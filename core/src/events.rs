//! Network event recording.
//!
//! The executor appends one `NetworkEvent` per completed call to an
//! `EventSink`. `NetworkEventStore` is the bundled sink: a fixed-capacity
//! ring buffer that overwrites its oldest entry once full.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::http::HttpMethod;

pub const DEFAULT_CAPACITY: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkEvent {
    pub id: Uuid,
    pub timestamp: SystemTime,
    pub method: String,
    pub url: String,
    pub host: Option<String>,
    /// Zero when no response was received.
    pub status_code: u16,
    pub duration_ns: u64,
    pub request_bytes: Option<usize>,
    pub response_bytes: usize,
}

impl NetworkEvent {
    pub fn new(
        timestamp: SystemTime,
        method: HttpMethod,
        url: &url::Url,
        status_code: u16,
        duration: Duration,
        request_bytes: Option<usize>,
        response_bytes: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            method: method.as_str().to_string(),
            url: url.to_string(),
            host: url.host_str().map(str::to_string),
            status_code,
            duration_ns: u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
            request_bytes,
            response_bytes,
        }
    }
}

/// Append-only destination for network events. Must not block for long.
pub trait EventSink: Send + Sync {
    fn append(&self, event: NetworkEvent);
}

#[derive(Debug)]
struct Ring {
    slots: Vec<NetworkEvent>,
    cursor: usize,
}

/// Fixed-capacity ring buffer of events.
#[derive(Debug)]
pub struct NetworkEventStore {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl Default for NetworkEventStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl NetworkEventStore {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: Mutex::new(Ring {
                slots: Vec::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                cursor: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events from oldest to newest.
    pub fn snapshot(&self) -> Vec<NetworkEvent> {
        let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        if ring.slots.len() < self.capacity {
            return ring.slots.clone();
        }
        let (newer, older) = ring.slots.split_at(ring.cursor);
        older.iter().chain(newer).cloned().collect()
    }

    pub fn clear(&self) {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        ring.slots.clear();
        ring.cursor = 0;
    }
}

impl EventSink for NetworkEventStore {
    fn append(&self, event: NetworkEvent) {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        if ring.slots.len() < self.capacity {
            ring.slots.push(event);
        } else {
            let cursor = ring.cursor;
            ring.slots[cursor] = event;
        }
        ring.cursor = (ring.cursor + 1) % self.capacity;
    }
}
