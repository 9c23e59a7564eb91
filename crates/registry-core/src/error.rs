// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared by channels and their collaborators.

use crate::protocol::{ErrorCode, ServerMessage};
use std::time::Duration;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("No acknowledgement within {0:?}")]
    AckTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Errors of the notification multiplexer's change stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultiplexerError {
    #[error("Change stream lagged behind by {0} events")]
    Lagged(u64),

    #[error("Change source failed: {0}")]
    Source(String),
}

/// Channel errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Control message or `change()` on a closed channel.
    #[error("Channel closed")]
    Closed,

    /// Message not valid in the current state.
    #[error("Unexpected message {0}")]
    UnexpectedMessage(String),

    /// Modify notification carrying no deltas.
    #[error("Modify notification for {0} carries no deltas")]
    EmptyModify(String),

    /// The transport's inbound stream was already taken by another channel.
    #[error("Inbound stream already subscribed")]
    InboundUnavailable,

    #[error("Upstream error: {0}")]
    Upstream(#[from] MultiplexerError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ChannelError {
    /// Wire error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Closed => ErrorCode::ChannelClosed,
            Self::UnexpectedMessage(_) => ErrorCode::UnexpectedMessage,
            Self::Upstream(_) => ErrorCode::Upstream,
            Self::EmptyModify(_) | Self::InboundUnavailable | Self::Transport(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Error reply sent to the peer.
    pub fn to_wire(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}
