// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle event identifiers and payloads.
//!
//! The built-in lifecycle events form a closed enumeration; user-defined
//! events live in a disjoint string-tag namespace and cannot shadow a
//! built-in tag.

use serde_json::Value;
use std::time::Instant;
use thiserror::Error;

/// Identifier a callback registers against.
///
/// The nine built-in variants are reserved; [`EventKind::custom`] refuses
/// tags that collide with them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Error,
    Signal,
    Init,
    PreExecute,
    PostExecute,
    Fork,
    PidChange,
    Idle,
    Shutdown,
    Custom(String),
}

/// Tags owned by the built-in lifecycle events.
const RESERVED_TAGS: [&str; 9] = [
    "error",
    "signal",
    "init",
    "preexecute",
    "postexecute",
    "fork",
    "pidchange",
    "idle",
    "shutdown",
];

/// A user tag collided with the reserved lifecycle namespace.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("event tag '{0}' is reserved for built-in lifecycle events")]
pub struct ReservedTag(pub String);

impl EventKind {
    /// Create a user-defined event kind.
    ///
    /// Empty tags and tags matching a built-in event are rejected.
    pub fn custom(tag: impl Into<String>) -> Result<Self, ReservedTag> {
        let tag = tag.into();
        if tag.is_empty() || RESERVED_TAGS.contains(&tag.as_str()) {
            return Err(ReservedTag(tag));
        }
        Ok(EventKind::Custom(tag))
    }

    pub fn as_tag(&self) -> &str {
        match self {
            EventKind::Error => "error",
            EventKind::Signal => "signal",
            EventKind::Init => "init",
            EventKind::PreExecute => "preexecute",
            EventKind::PostExecute => "postexecute",
            EventKind::Fork => "fork",
            EventKind::PidChange => "pidchange",
            EventKind::Idle => "idle",
            EventKind::Shutdown => "shutdown",
            EventKind::Custom(tag) => tag,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// A dispatched event with its payload.
#[derive(Debug, Clone)]
pub enum Event {
    /// A recoverable or fatal error was surfaced.
    Error { message: String },
    /// A signal outside the handled set arrived.
    Signal { signum: i32 },
    /// Dispatched once during controller init, before app setup.
    Init,
    PreExecute,
    PostExecute,
    /// A one-shot task or pool executor was spawned.
    Fork { child: u64, name: String },
    /// The process identity changed (observed after a daemonized re-spawn).
    PidChange { pid: u32 },
    /// The loop has idle budget. `deadline` is the moment the budget runs
    /// out; long-running idle work should stop once it passes.
    Idle { deadline: Instant },
    Shutdown,
    Custom { tag: String, data: Value },
}

impl Event {
    /// The identifier this event dispatches under.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Error { .. } => EventKind::Error,
            Event::Signal { .. } => EventKind::Signal,
            Event::Init => EventKind::Init,
            Event::PreExecute => EventKind::PreExecute,
            Event::PostExecute => EventKind::PostExecute,
            Event::Fork { .. } => EventKind::Fork,
            Event::PidChange { .. } => EventKind::PidChange,
            Event::Idle { .. } => EventKind::Idle,
            Event::Shutdown => EventKind::Shutdown,
            Event::Custom { tag, .. } => EventKind::Custom(tag.clone()),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
