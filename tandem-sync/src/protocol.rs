//! Sync protocol envelopes.
//!
//! The protocol is a three-step handshake over a peer channel:
//! 1. The initiator sends `SYNC_REQUEST` as soon as the channel opens
//! 2. The responder exports its snapshot and answers with `SYNC_DATA`
//! 3. The initiator merges the snapshot and answers with `SYNC_COMPLETE`
//!
//! Envelopes are JSON objects with exactly the fields `type`, `payload`
//! (only on `SYNC_DATA`), `timestamp` (sender's epoch milliseconds) and
//! `deviceId` (sender's persisted device identifier).

use crate::error::{SyncError, SyncResult};
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tandem_types::{DeviceId, Timestamp};

/// Fields every inbound envelope must carry.
const REQUIRED_FIELDS: [&str; 3] = ["type", "timestamp", "deviceId"];

/// The kind of a sync envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeKind {
    /// Ask the peer for its snapshot.
    SyncRequest,
    /// A snapshot in reply to a request.
    SyncData,
    /// The snapshot was merged.
    SyncComplete,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SyncRequest => "SYNC_REQUEST",
            Self::SyncData => "SYNC_DATA",
            Self::SyncComplete => "SYNC_COMPLETE",
        };
        f.write_str(s)
    }
}

/// The only unit exchanged over a peer channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnvelope {
    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Snapshot, present only on `SYNC_DATA`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Snapshot>,
    /// Sender's clock when the envelope was created.
    pub timestamp: Timestamp,
    /// Sender's device ID.
    pub device_id: DeviceId,
}

impl SyncEnvelope {
    /// Creates a `SYNC_REQUEST`.
    pub fn request(device_id: DeviceId) -> Self {
        Self::new(EnvelopeKind::SyncRequest, None, device_id)
    }

    /// Creates a `SYNC_DATA` carrying a snapshot.
    pub fn data(device_id: DeviceId, snapshot: Snapshot) -> Self {
        Self::new(EnvelopeKind::SyncData, Some(snapshot), device_id)
    }

    /// Creates a `SYNC_COMPLETE`.
    pub fn complete(device_id: DeviceId) -> Self {
        Self::new(EnvelopeKind::SyncComplete, None, device_id)
    }

    fn new(kind: EnvelopeKind, payload: Option<Snapshot>, device_id: DeviceId) -> Self {
        Self {
            kind,
            payload,
            timestamp: Timestamp::now(),
            device_id,
        }
    }

    /// Serializes the envelope to JSON bytes.
    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses and validates an inbound envelope.
    ///
    /// Rejects anything that is not a JSON object carrying `type`,
    /// `timestamp` and `deviceId`, and `SYNC_DATA` without a payload. A
    /// payload on the other kinds is discarded.
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::Protocol(format!("envelope is not JSON: {e}")))?;

        {
            let object = value
                .as_object()
                .ok_or_else(|| SyncError::Protocol("envelope is not an object".into()))?;
            if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !object.contains_key(**f)) {
                return Err(SyncError::Protocol(format!("envelope missing `{missing}`")));
            }
        }

        let mut envelope: SyncEnvelope = serde_json::from_value(value)
            .map_err(|e| SyncError::Protocol(format!("invalid envelope: {e}")))?;

        match envelope.kind {
            EnvelopeKind::SyncData if envelope.payload.is_none() => {
                Err(SyncError::Protocol("SYNC_DATA without payload".into()))
            }
            EnvelopeKind::SyncData => Ok(envelope),
            EnvelopeKind::SyncRequest | EnvelopeKind::SyncComplete => {
                envelope.payload = None;
                Ok(envelope)
            }
        }
    }
}
