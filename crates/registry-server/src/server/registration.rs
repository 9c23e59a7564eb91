// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registration channel: one registrant keeping one instance alive.

use super::registry::{InstanceRegistry, RegistryError};
use futures::StreamExt;
use parking_lot::Mutex;
use registry_core::{
    ChannelCore, ChannelError, ChannelId, ChannelState, ClientMessage, ErrorCode, InboundStream,
    InstanceInfo, MessageConnection, ServerMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Registration channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Idle,
    Registered,
    Closed,
}

impl ChannelState for RegistrationState {
    fn to_raw(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Registered => 1,
            Self::Closed => 2,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Registered,
            _ => Self::Closed,
        }
    }
}

/// Per-registrant session.
pub struct RegistrationChannel {
    core: ChannelCore<RegistrationState>,
    registry: Arc<InstanceRegistry>,
    lease_duration: Duration,
    // Serializes inbound handling against close().
    instance_id: Mutex<Option<String>>,
}

impl RegistrationChannel {
    /// Open a registration channel on `transport`.
    pub fn open(
        transport: Arc<dyn MessageConnection>,
        registry: Arc<InstanceRegistry>,
        lease_duration: Duration,
    ) -> Result<Arc<Self>, ChannelError> {
        let core = ChannelCore::new(ChannelId::next(), RegistrationState::Idle, transport);
        let inbound = core.subscribe_to_transport_input()?;

        let channel = Arc::new(Self {
            core,
            registry,
            lease_duration,
            instance_id: Mutex::new(None),
        });

        channel.core.send_ack_on_transport();
        info!(channel = %channel.id(), "Registration channel open");

        tokio::spawn(Arc::clone(&channel).run_inbound(inbound));

        Ok(channel)
    }

    pub fn id(&self) -> ChannelId {
        self.core.id()
    }

    pub fn state(&self) -> RegistrationState {
        self.core.state()
    }

    /// Id of the instance this channel keeps alive, if any.
    pub fn instance_id(&self) -> Option<String> {
        self.instance_id.lock().clone()
    }

    /// Close the channel and unregister its instance. Only the first call acts.
    pub fn close(&self) {
        let mut instance_id = self.instance_id.lock();
        loop {
            let state = self.core.state();
            if state == RegistrationState::Closed {
                return;
            }
            if self
                .core
                .state_cell()
                .compare_and_set(state, RegistrationState::Closed)
            {
                break;
            }
        }

        if let Some(id) = instance_id.take() {
            self.registry.unregister(&id);
            info!(channel = %self.id(), "Unregistered {} on close", id);
        }
        drop(instance_id);

        self.core.close_transport();
        info!(channel = %self.id(), "Registration channel closed");
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
        debug!(channel = %self.id(), "Received {}", message.name());
        match message {
            ClientMessage::Register { instance } => self.on_register(instance),
            ClientMessage::Heartbeat => self.on_heartbeat(),
            ClientMessage::Unregister => self.on_unregister(),
            other => self.reply_error(ChannelError::UnexpectedMessage(other.name().into())),
        }
    }

    fn on_register(&self, instance: InstanceInfo) {
        let mut registered = self.instance_id.lock();
        if self.core.state() == RegistrationState::Closed {
            return self.reply_error(ChannelError::Closed);
        }
        if let Some(current) = registered.as_deref() {
            if current != instance.id {
                return self.reply_error(ChannelError::UnexpectedMessage(format!(
                    "register for {} while registered as {}",
                    instance.id, current
                )));
            }
        }

        let id = instance.id.clone();
        match self.registry.register(instance, self.lease_duration) {
            Ok(outcome) => {
                debug!(channel = %self.id(), "Register {}: {:?}", id, outcome);
                *registered = Some(id);
                self.core.set_state(RegistrationState::Registered);
                self.core.send_ack_on_transport();
            }
            Err(e) => self.reply_registry_error(e),
        }
    }

    fn on_heartbeat(&self) {
        let mut registered = self.instance_id.lock();
        match self.core.state() {
            RegistrationState::Closed => self.reply_error(ChannelError::Closed),
            RegistrationState::Idle => self.reply_error(ChannelError::UnexpectedMessage(
                "heartbeat before register".into(),
            )),
            RegistrationState::Registered => {
                let Some(id) = registered.clone() else {
                    return;
                };
                match self.registry.renew(&id, None) {
                    Ok(()) => {
                        self.core.send_ack_on_transport();
                    }
                    Err(e) => {
                        // Evicted by the sweep; the registrant has to register again.
                        *registered = None;
                        self.core.set_state(RegistrationState::Idle);
                        self.reply_registry_error(e);
                    }
                }
            }
        }
    }

    fn on_unregister(&self) {
        let mut registered = self.instance_id.lock();
        match self.core.state() {
            RegistrationState::Closed => self.reply_error(ChannelError::Closed),
            RegistrationState::Idle => self.reply_error(ChannelError::UnexpectedMessage(
                "unregister before register".into(),
            )),
            RegistrationState::Registered => {
                if let Some(id) = registered.take() {
                    self.registry.unregister(&id);
                    info!(channel = %self.id(), "Unregistered {}", id);
                }
                self.core.set_state(RegistrationState::Idle);
                self.core.send_ack_on_transport();
            }
        }
    }

    fn reply_error(&self, error: ChannelError) {
        warn!(channel = %self.id(), "{}", error);
        self.core.send_error_on_transport(&error);
    }

    fn reply_registry_error(&self, error: RegistryError) {
        warn!(channel = %self.id(), "Registry rejected request: {}", error);
        let reply = ServerMessage::Error {
            code: ErrorCode::Internal,
            message: error.to_string(),
        };
        self.core
            .subscribe_to_transport_send(self.core.transport().submit(reply), "error");
    }
}
