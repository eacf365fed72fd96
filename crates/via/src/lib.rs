// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! drover-via: the typed message transport between a mediator parent and
//! its worker pool.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload. The
//! in-process [`ChannelVia`] honors the same envelope contract, so an
//! out-of-process transport can be substituted without touching the
//! mediator.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod envelope;
mod queue;

pub use envelope::{decode, encode, read_message, write_message, Envelope, EnvelopeKind};
pub use queue::{backoff, ChannelVia, ViaError, ViaState, DEFAULT_CAPACITY};
