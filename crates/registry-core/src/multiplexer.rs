// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Notification multiplexer contract.

use crate::error::MultiplexerError;
use crate::interest::Interest;
use crate::notification::ChangeNotification;
use futures::stream::BoxStream;

/// Change sequence honoring the multiplexer's current interest.
pub type NotificationStream = BoxStream<'static, Result<ChangeNotification, MultiplexerError>>;

/// Turns a channel's current interest into a live change sequence.
pub trait NotificationMultiplexer: Send + Sync + 'static {
    /// Lazy, channel-lifetime change sequence.
    ///
    /// Yields `Err` at most once, as the final item. Ends when
    /// [`unregister`](Self::unregister) is called or the source goes away.
    fn change_notifications(&self) -> NotificationStream;

    /// Replace the scope for future events. Not retroactive.
    fn update(&self, interest: Interest);

    /// Stop producing events and release resources.
    fn unregister(&self);
}
