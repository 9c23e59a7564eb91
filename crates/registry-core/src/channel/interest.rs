// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interest channel: streams the live registry view to one subscriber.
//!
//! # States
//!
//! ```text
//! Idle --open()--> Open --close()--> Closed
//! ```
//!
//! `Idle` only exists while [`InterestChannel::open`] runs; callers always
//! get the channel back `Open`. `Closed` is terminal.
//!
//! # Ordering
//!
//! One task drives the multiplexer's change sequence and awaits every
//! `submit_with_ack` before starting the next, so a notification's messages
//! are all acknowledged before the next notification's first message goes
//! out. Replies to inbound messages share the channel's outbound queue, so
//! they are written in the order the inbound messages arrived. They do not
//! wait behind data messages, and an interest change's acknowledgement may
//! reach the peer before the new scope takes effect.

use super::{ChannelCore, ChannelId, ChannelState, PendingAck};
use crate::error::ChannelError;
use crate::interest::Interest;
use crate::multiplexer::{NotificationMultiplexer, NotificationStream};
use crate::notification::ChangeNotification;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::{InboundStream, MessageConnection};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Interest channel states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestState {
    Idle,
    Open,
    Closed,
}

impl ChannelState for InterestState {
    fn to_raw(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Open => 1,
            Self::Closed => 2,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Per-subscriber interest session.
pub struct InterestChannel<M: NotificationMultiplexer> {
    core: ChannelCore<InterestState>,
    multiplexer: M,
    interest: Mutex<Interest>,
}

impl<M: NotificationMultiplexer> InterestChannel<M> {
    /// Open a channel on `transport` with a fresh id.
    pub fn open(
        transport: Arc<dyn MessageConnection>,
        multiplexer: M,
    ) -> Result<Arc<Self>, ChannelError> {
        Self::open_with_id(ChannelId::next(), transport, multiplexer)
    }

    /// Open a channel on `transport`.
    ///
    /// The inbound stream is taken before the open acknowledgement is sent,
    /// so a peer reacting to that acknowledgement cannot race the handler.
    pub fn open_with_id(
        id: ChannelId,
        transport: Arc<dyn MessageConnection>,
        multiplexer: M,
    ) -> Result<Arc<Self>, ChannelError> {
        let core = ChannelCore::new(id, InterestState::Idle, transport);
        let inbound = core.subscribe_to_transport_input()?;

        let channel = Arc::new(Self {
            core,
            multiplexer,
            interest: Mutex::new(Interest::None),
        });

        channel.core.send_ack_on_transport();

        channel.multiplexer.update(Interest::None);
        let notifications = channel.multiplexer.change_notifications();

        channel.core.set_state(InterestState::Open);
        info!(channel = %id, "Interest channel open");

        tokio::spawn(channel.clone().run_inbound(inbound));
        tokio::spawn(channel.clone().run_delivery(notifications));

        Ok(channel)
    }

    pub fn id(&self) -> ChannelId {
        self.core.id()
    }

    pub fn state(&self) -> InterestState {
        self.core.state()
    }

    /// Interest currently in effect.
    pub fn interest(&self) -> Interest {
        self.interest.lock().clone()
    }

    /// Replace the channel's interest and acknowledge it to the peer.
    ///
    /// The acknowledgement is sent whether or not the returned handle is
    /// awaited. Fails with [`ChannelError::Closed`] without touching the
    /// transport or the multiplexer once the channel is closed.
    pub fn change(&self, new_interest: Interest) -> Result<PendingAck, ChannelError> {
        debug!(channel = %self.id(), interest = ?new_interest, "Interest change request");

        // Held across the check so close() cannot reset the interest in between.
        let mut interest = self.interest.lock();
        if self.core.state() == InterestState::Closed {
            return Err(ChannelError::Closed);
        }

        *interest = new_interest.clone();
        self.multiplexer.update(new_interest);
        drop(interest);

        Ok(self.core.send_ack_on_transport())
    }

    /// Close the channel: drop the interest, unregister from the
    /// multiplexer and shut the transport down. Only the first call acts.
    pub fn close(&self) {
        if self
            .core
            .state_cell()
            .compare_and_set(InterestState::Open, InterestState::Closed)
        {
            *self.interest.lock() = Interest::None;
            self.multiplexer.unregister();
            self.core.close_transport();
            info!(channel = %self.id(), "Interest channel closed");
        }
    }

    /// Resolves once the channel is closed.
    pub async fn closed(&self) {
        self.core.closed().await
    }

    async fn run_inbound(self: Arc<Self>, mut inbound: InboundStream) {
        while let Some(message) = inbound.next().await {
            self.handle_message(message);
        }
        debug!(channel = %self.id(), "Inbound stream ended");
        self.close();
    }

    fn handle_message(&self, message: ClientMessage) {
        let interest = match message {
            ClientMessage::InterestRegistration { interests } => Interest::composite(interests),
            ClientMessage::UnregisterInterestSet => Interest::None,
            other => {
                warn!(channel = %self.id(), "Unexpected message {}", other.name());
                self.core
                    .send_error_on_transport(&ChannelError::UnexpectedMessage(other.name().into()));
                return;
            }
        };

        if self.core.state() == InterestState::Idle {
            self.core.send_error_on_transport(&ChannelError::UnexpectedMessage(
                "control message before open".into(),
            ));
            return;
        }

        // change() makes the closed check itself, so a close() racing this
        // handler still gets the peer a ChannelClosed reply.
        if let Err(e) = self.change(interest) {
            self.core.send_error_on_transport(&e);
        }
    }

    async fn run_delivery(self: Arc<Self>, mut notifications: NotificationStream) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.core.closed() => break,
                next = notifications.next() => next,
            };

            if self.core.state() == InterestState::Closed {
                break;
            }

            match next {
                Some(Ok(notification)) => {
                    let kind = notification.kind();
                    if let Err(e) = self.send_notification(notification).await {
                        warn!(
                            channel = %self.id(),
                            "Failed to deliver {} notification: {}", kind, e
                        );
                    }
                }
                Some(Err(e)) => {
                    warn!(channel = %self.id(), "Change stream failed: {}", e);
                    self.core.send_stream_error_on_transport(&e);
                    break;
                }
                None => {
                    debug!(channel = %self.id(), "Change stream completed");
                    self.core.send_on_complete_on_transport();
                    *self.interest.lock() = Interest::None;
                    break;
                }
            }
        }
    }

    /// Translate one notification into wire messages and send them in order,
    /// each after the previous one was acknowledged.
    async fn send_notification(
        &self,
        notification: ChangeNotification,
    ) -> Result<(), ChannelError> {
        let transport = self.core.transport();

        match notification {
            ChangeNotification::Add(instance) => {
                transport
                    .submit_with_ack(ServerMessage::AddInstance { instance })
                    .await?;
            }
            ChangeNotification::Delete(instance_id) => {
                transport
                    .submit_with_ack(ServerMessage::DeleteInstance { instance_id })
                    .await?;
            }
            ChangeNotification::Modify(instance, deltas) => {
                if deltas.is_empty() {
                    return Err(ChannelError::EmptyModify(instance.id));
                }
                for delta in deltas {
                    if self.core.state() == InterestState::Closed {
                        return Err(ChannelError::Closed);
                    }
                    transport
                        .submit_with_ack(ServerMessage::UpdateInstanceInfo { delta })
                        .await?;
                }
            }
        }

        Ok(())
    }
}
