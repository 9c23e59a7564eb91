// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry liveness and delivery core.
//!
//! Two pieces live here:
//!
//! - **Leases**: per-instance expiring liveness records ([`Lease`]), renewed
//!   by heartbeats and read by the expiry sweep without any locking.
//! - **Interest channels**: per-subscriber sessions ([`InterestChannel`])
//!   that turn the subscriber's interest into a strictly ordered,
//!   acknowledgement-driven stream of registry changes.
//!
//! Storage, wire framing and the change feed are collaborators behind the
//! [`MessageConnection`] and [`NotificationMultiplexer`] traits.
//!
//! # Flow
//!
//! ```text
//! peer ──open──▶ InterestChannel (Open, interest = None)
//! peer ──interest_registration──▶ change(I) ──▶ multiplexer.update(I), ack
//! multiplexer ──Add/Delete/Modify──▶ add_instance / delete_instance /
//!                                    update_instance_info (one per delta)
//! close() ──▶ multiplexer.unregister(), transport.shutdown()
//! ```

pub mod channel;
pub mod error;
pub mod instance;
pub mod interest;
pub mod lease;
pub mod multiplexer;
pub mod notification;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{
    ChannelCore, ChannelId, ChannelState, InterestChannel, InterestState, PendingAck, StateCell,
};
pub use error::{ChannelError, MultiplexerError, TransportError};
pub use instance::{Delta, DeltaField, InstanceInfo, InstanceStatus};
pub use interest::Interest;
pub use lease::{Clock, Lease, LeaseError, SystemClock, DEFAULT_LEASE_DURATION};
pub use multiplexer::{NotificationMultiplexer, NotificationStream};
pub use notification::ChangeNotification;
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};
pub use transport::{AckFuture, InboundStream, MessageConnection};
