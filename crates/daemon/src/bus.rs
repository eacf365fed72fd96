// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event dispatch bus with per-callback throttling.
//!
//! Callbacks are keyed by [`EventKind`] and invoked in insertion order.
//! A throttled callback is skipped while `next_allowed_at` lies in the
//! future; dispatching to an unregistered kind is a silent no-op. Every
//! callback receives the daemon's [`ShutdownHandle`] alongside the event,
//! so listener code can request termination.

use crate::shutdown::ShutdownHandle;
use drover_core::{Clock, Event, EventKind, SystemClock};
use std::collections::HashMap;
use std::time::{Duration, Instant};

type Callback = Box<dyn FnMut(&Event, &ShutdownHandle) + Send>;

struct Registration {
    token: u64,
    throttle: Option<Duration>,
    next_allowed: Option<Instant>,
    callback: Callback,
}

/// Identifies one registered callback; pass back to [`EventBus::off`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackHandle {
    kind: EventKind,
    token: u64,
}

impl CallbackHandle {
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }
}

/// Register/dispatch hub owned by the lifecycle controller.
pub struct EventBus<C: Clock = SystemClock> {
    clock: C,
    shutdown: ShutdownHandle,
    slots: HashMap<EventKind, Vec<Registration>>,
    next_token: u64,
}

impl EventBus<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for EventBus<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> EventBus<C> {
    pub fn with_clock(clock: C) -> Self {
        Self::with_clock_and_shutdown(clock, ShutdownHandle::new())
    }

    /// A bus wired to an existing shutdown flag (the controller shares its
    /// own with the buses it owns).
    pub fn with_clock_and_shutdown(clock: C, shutdown: ShutdownHandle) -> Self {
        Self {
            clock,
            shutdown,
            slots: HashMap::new(),
            next_token: 0,
        }
    }

    /// The shutdown flag passed to every callback.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Append a callback for `kind`.
    pub fn on(
        &mut self,
        kind: EventKind,
        callback: impl FnMut(&Event, &ShutdownHandle) + Send + 'static,
    ) -> CallbackHandle {
        self.register(kind, None, Box::new(callback))
    }

    /// Append a callback invoked at most once per `throttle`.
    pub fn on_throttled(
        &mut self,
        kind: EventKind,
        throttle: Duration,
        callback: impl FnMut(&Event, &ShutdownHandle) + Send + 'static,
    ) -> CallbackHandle {
        self.register(kind, Some(throttle), Box::new(callback))
    }

    fn register(
        &mut self,
        kind: EventKind,
        throttle: Option<Duration>,
        callback: Callback,
    ) -> CallbackHandle {
        let token = self.next_token;
        self.next_token += 1;
        self.slots.entry(kind.clone()).or_default().push(Registration {
            token,
            throttle,
            next_allowed: None,
            callback,
        });
        CallbackHandle { kind, token }
    }

    /// Remove a callback. Returns false when the handle is already gone.
    pub fn off(&mut self, handle: &CallbackHandle) -> bool {
        let Some(list) = self.slots.get_mut(&handle.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.token != handle.token);
        list.len() != before
    }

    /// Invoke every callback registered for the event's kind.
    ///
    /// Returns how many callbacks ran (throttled ones are skipped, not
    /// counted).
    pub fn dispatch(&mut self, event: &Event) -> usize {
        let now = self.clock.now();
        let shutdown = self.shutdown.clone();
        let Some(list) = self.slots.get_mut(&event.kind()) else {
            return 0;
        };
        let mut invoked = 0;
        for registration in list.iter_mut() {
            if invoke(registration, event, &shutdown, now) {
                invoked += 1;
            }
        }
        invoked
    }

    /// Invoke a single registered callback, honoring its throttle.
    pub fn dispatch_to(&mut self, handle: &CallbackHandle, event: &Event) -> bool {
        let now = self.clock.now();
        let shutdown = self.shutdown.clone();
        let Some(list) = self.slots.get_mut(&handle.kind) else {
            return false;
        };
        match list.iter_mut().find(|r| r.token == handle.token) {
            Some(registration) => invoke(registration, event, &shutdown, now),
            None => false,
        }
    }

    /// Number of callbacks registered for `kind`.
    pub fn registered(&self, kind: &EventKind) -> usize {
        self.slots.get(kind).map(|l| l.len()).unwrap_or(0)
    }

    /// Drop every registration. Used before a restart re-exec so nothing
    /// fires while the process winds down.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

fn invoke(
    registration: &mut Registration,
    event: &Event,
    shutdown: &ShutdownHandle,
    now: Instant,
) -> bool {
    if let Some(next_allowed) = registration.next_allowed {
        if next_allowed > now {
            return false;
        }
    }
    if let Some(throttle) = registration.throttle {
        registration.next_allowed = Some(now + throttle);
    }
    (registration.callback)(event, shutdown);
    true
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
