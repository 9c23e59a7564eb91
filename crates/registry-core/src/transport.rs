// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message connection contract consumed by channels.

use crate::error::TransportError;
use crate::protocol::{ClientMessage, ServerMessage};
use futures::future::BoxFuture;
use futures::stream::BoxStream;

/// Completion of one outbound send.
pub type AckFuture = BoxFuture<'static, Result<(), TransportError>>;

/// Decoded inbound messages, strictly in arrival order.
pub type InboundStream = BoxStream<'static, ClientMessage>;

/// Ordered, reliable, message-typed connection to one peer.
///
/// Sends are lazy: the returned future writes nothing until it is polled.
/// Channels rely on this to chain sends one after another.
pub trait MessageConnection: Send + Sync + 'static {
    /// Send `message`; resolves once the peer acknowledges it.
    fn submit_with_ack(&self, message: ServerMessage) -> AckFuture;

    /// Send `message`; resolves once it has been written.
    fn submit(&self, message: ServerMessage) -> AckFuture;

    /// Send a protocol acknowledgement.
    fn acknowledge(&self) -> AckFuture {
        self.submit(ServerMessage::Acknowledgement)
    }

    /// Take the inbound message stream.
    ///
    /// Messages are buffered from connection start, so nothing is lost to a
    /// handler that subscribes late. Returns `None` after the first call.
    fn subscribe_inbound(&self) -> Option<InboundStream>;

    /// Close the connection. Idempotent.
    fn shutdown(&self);
}
