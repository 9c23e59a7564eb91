// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry wire protocol messages.
//!
//! Messages are JSON objects tagged by `type`. Framing lives in the
//! transport implementation; this module only defines the decoded shapes.

use crate::instance::{Delta, InstanceInfo};
use crate::interest::Interest;
use serde::{Deserialize, Serialize};

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace the channel's interest.
    InterestRegistration { interests: Vec<Interest> },

    /// Drop the channel's interest.
    UnregisterInterestSet,

    /// Register (or update) an instance on a registration channel.
    Register { instance: InstanceInfo },

    /// Remove the instance registered on this channel.
    Unregister,

    /// Renew the lease of the instance registered on this channel.
    Heartbeat,

    /// Peer acknowledgement of a message submitted with ack.
    Acknowledgement,

    /// Any message type this server does not know.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Message type name, as on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InterestRegistration { .. } => "interest_registration",
            Self::UnregisterInterestSet => "unregister_interest_set",
            Self::Register { .. } => "register",
            Self::Unregister => "unregister",
            Self::Heartbeat => "heartbeat",
            Self::Acknowledgement => "acknowledgement",
            Self::Unknown => "unknown",
        }
    }
}

/// Server -> client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Instance entered the interest scope.
    AddInstance { instance: InstanceInfo },

    /// Instance left the registry.
    DeleteInstance { instance_id: String },

    /// One field-level change.
    UpdateInstanceInfo { delta: Delta },

    /// Protocol-level acknowledgement.
    Acknowledgement,

    /// The change stream ended.
    StreamComplete,

    /// The change stream failed upstream.
    StreamError { message: String },

    /// Error reply.
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    /// Message type name, as on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddInstance { .. } => "add_instance",
            Self::DeleteInstance { .. } => "delete_instance",
            Self::UpdateInstanceInfo { .. } => "update_instance_info",
            Self::Acknowledgement => "acknowledgement",
            Self::StreamComplete => "stream_complete",
            Self::StreamError { .. } => "stream_error",
            Self::Error { .. } => "error",
        }
    }
}

/// Error reply codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The session is gone.
    ChannelClosed,
    /// The peer sent a message that is not valid here.
    UnexpectedMessage,
    /// Upstream failure forwarded to the peer.
    Upstream,
    /// Anything else.
    Internal,
}
