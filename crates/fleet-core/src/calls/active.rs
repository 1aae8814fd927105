//! Active-call registry

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::provider::ChannelId;

/// A session's membership in a channel's live call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCall {
    pub session_name: String,
    pub channel_id: ChannelId,
    pub channel_title: String,
    pub join_time: Instant,
}

impl ActiveCall {
    pub fn new(session_name: impl Into<String>, channel_id: ChannelId, channel_title: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            channel_id,
            channel_title: channel_title.into(),
            join_time: Instant::now(),
        }
    }

    /// Time spent in the call so far
    pub fn elapsed(&self) -> Duration {
        self.join_time.elapsed()
    }
}

/// At most one [`ActiveCall`] per session
#[derive(Debug, Default)]
pub struct ActiveCalls {
    calls: DashMap<String, ActiveCall>,
}

impl ActiveCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call; refused when the session already has one
    pub fn insert(&self, call: ActiveCall) -> bool {
        match self.calls.entry(call.session_name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(call);
                true
            }
        }
    }

    pub fn get(&self, session_name: &str) -> Option<ActiveCall> {
        self.calls.get(session_name).map(|call| call.clone())
    }

    pub fn contains(&self, session_name: &str) -> bool {
        self.calls.contains_key(session_name)
    }

    pub fn remove(&self, session_name: &str) -> Option<ActiveCall> {
        self.calls.remove(session_name).map(|(_, call)| call)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Every active call, ordered by session name
    pub fn snapshot(&self) -> Vec<ActiveCall> {
        let mut calls: Vec<ActiveCall> = self.calls.iter().map(|entry| entry.value().clone()).collect();
        calls.sort_by(|a, b| a.session_name.cmp(&b.session_name));
        calls
    }
}
