// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport envelopes and their canonical encoding.

use drover_core::{CallId, CallStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::queue::ViaError;

/// The three message lanes of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// Parent → pool. Exactly one executor consumes each.
    Call,
    /// Executor → parent: pick-up acknowledgement.
    Running,
    /// Executor → parent: result (or error) of the call.
    Return,
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EnvelopeKind::Call => "call",
            EnvelopeKind::Running => "running",
            EnvelopeKind::Return => "return",
        })
    }
}

/// A message on the transport: `(kind, call_id, payload)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Envelope {
    #[serde(rename = "call")]
    Call {
        id: CallId,
        method: String,
        args: Vec<Value>,
        /// Transport re-send attempts so far.
        retries: u32,
        /// Epoch-ms the parent placed this on the queue.
        queued_at: u64,
    },

    #[serde(rename = "running")]
    Running {
        id: CallId,
        /// Executor identity (slot incarnation in-process, pid otherwise).
        pid: u32,
        started_at: u64,
    },

    #[serde(rename = "return")]
    Return {
        id: CallId,
        /// `Returned` for a clean result, `Uncaught` for a worker error.
        status: CallStatus,
        return_value: Value,
        returned_at: u64,
    },
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Call { .. } => EnvelopeKind::Call,
            Envelope::Running { .. } => EnvelopeKind::Running,
            Envelope::Return { .. } => EnvelopeKind::Return,
        }
    }

    pub fn call_id(&self) -> CallId {
        match self {
            Envelope::Call { id, .. }
            | Envelope::Running { id, .. }
            | Envelope::Return { id, .. } => *id,
        }
    }

    /// Approximate wire size, used for queue memory accounting.
    pub fn size_hint(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// Encode an envelope as raw JSON (no length prefix).
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, ViaError> {
    serde_json::to_vec(envelope).map_err(ViaError::from)
}

/// Decode an envelope from raw JSON.
pub fn decode(bytes: &[u8]) -> Result<Envelope, ViaError> {
    serde_json::from_slice(bytes).map_err(ViaError::from)
}

/// Write a length-prefixed message: 4-byte big-endian length, then payload.
pub async fn write_message<W>(writer: &mut W, payload: &[u8]) -> Result<(), ViaError>
where
    W: AsyncWriteExt + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| ViaError::FrameTooLarge(payload.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Read one length-prefixed message.
pub async fn read_message<R>(reader: &mut R) -> Result<Vec<u8>, ViaError>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
