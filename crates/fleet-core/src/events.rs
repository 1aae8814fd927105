//! Fleet events
//!
//! Lifecycle changes are published on a `tokio::sync::broadcast` channel.
//! Publishing never blocks and never fails: with no subscriber the event is
//! simply dropped, and a lagging subscriber loses the oldest events.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::provider::ChannelId;

/// Capacity of the broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something that happened to the fleet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEvent {
    /// A session was persisted and registered
    SessionAdded { session: String },
    /// A session was removed from the store and the pool
    SessionRemoved { session: String },
    /// A session's connection and call layer came up
    SessionOnline { session: String },
    /// A session's connection was shut down
    SessionOffline { session: String },
    /// A session joined a channel's live call
    CallJoined {
        session: String,
        channel: ChannelId,
        title: String,
    },
    /// A session left a channel's live call
    CallLeft {
        session: String,
        channel: ChannelId,
        duration: Duration,
    },
    /// A login flow ended, successfully or not
    AuthFlowFinished {
        user: i64,
        session: Option<String>,
        success: bool,
    },
}

impl FleetEvent {
    /// Session the event is about, if any
    pub fn session(&self) -> Option<&str> {
        match self {
            FleetEvent::SessionAdded { session }
            | FleetEvent::SessionRemoved { session }
            | FleetEvent::SessionOnline { session }
            | FleetEvent::SessionOffline { session }
            | FleetEvent::CallJoined { session, .. }
            | FleetEvent::CallLeft { session, .. } => Some(session),
            FleetEvent::AuthFlowFinished { session, .. } => session.as_deref(),
        }
    }
}

/// Event with the time it was published
#[derive(Debug, Clone)]
pub struct TimedEvent {
    pub event: FleetEvent,
    pub timestamp: DateTime<Utc>,
}

/// Cloneable publisher shared by the pool, the coordinator and the login flows
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TimedEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event
    pub fn emit(&self, event: FleetEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(TimedEvent {
            event,
            timestamp: Utc::now(),
        });
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TimedEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
