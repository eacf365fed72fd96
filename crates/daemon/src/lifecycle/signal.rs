// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signal reception.
//!
//! Dedicated tokio tasks turn process signals into values on a channel;
//! nothing else happens in signal context. The controller drains the
//! channel at iteration boundaries and acts on the flags there.

use nix::sys::signal::Signal as NixSignal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// A received signal, pre-classified for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sig {
    /// SIGTERM or SIGINT: finish the iteration, then exit.
    Term,
    Int,
    /// SIGHUP: restart.
    Hup,
    /// SIGUSR1: dump runtime statistics.
    Usr1,
    /// Anything else we catch; dispatched as ON_SIGNAL only.
    Other(i32),
}

impl Sig {
    pub fn signum(self) -> i32 {
        match self {
            Sig::Term => NixSignal::SIGTERM as i32,
            Sig::Int => NixSignal::SIGINT as i32,
            Sig::Hup => NixSignal::SIGHUP as i32,
            Sig::Usr1 => NixSignal::SIGUSR1 as i32,
            Sig::Other(n) => n,
        }
    }
}

/// Receiving end of the installed signal listeners.
pub struct SignalHub {
    rx: mpsc::UnboundedReceiver<Sig>,
}

impl SignalHub {
    /// Install listeners for the handled set plus the pass-through set.
    ///
    /// Must run inside a tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listeners = [
            (SignalKind::terminate(), Sig::Term),
            (SignalKind::interrupt(), Sig::Int),
            (SignalKind::hangup(), Sig::Hup),
            (SignalKind::user_defined1(), Sig::Usr1),
            (SignalKind::user_defined2(), Sig::Other(NixSignal::SIGUSR2 as i32)),
            (SignalKind::quit(), Sig::Other(NixSignal::SIGQUIT as i32)),
        ];
        for (kind, sig) in listeners {
            let mut stream = signal(kind)?;
            let tx = tx.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if tx.send(sig).is_err() {
                        break;
                    }
                }
            });
        }
        Ok(Self { rx })
    }

    /// A hub fed by the returned sender instead of process signals.
    /// Used by tests and embedders that deliver synthetic signals.
    pub fn channel() -> (mpsc::UnboundedSender<Sig>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Non-blocking poll.
    pub fn try_next(&mut self) -> Option<Sig> {
        self.rx.try_recv().ok()
    }

    /// Await the next signal; `None` when every sender is gone.
    pub async fn recv(&mut self) -> Option<Sig> {
        self.rx.recv().await
    }
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod tests;
