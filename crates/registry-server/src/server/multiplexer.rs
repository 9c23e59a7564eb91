// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-channel view of the registry change feed.

use super::registry::{InstanceRegistry, RegistryChange};
use futures::StreamExt;
use registry_core::{
    ChangeNotification, Interest, MultiplexerError, NotificationMultiplexer, NotificationStream,
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Filters the registry feed by one channel's interest.
///
/// The interest is read when each change arrives, so an update only affects
/// changes published after it. A modify that moves an instance into the
/// interest is delivered as an add, one that moves it out as a delete.
pub struct InterestNotificationMultiplexer {
    registry: Arc<InstanceRegistry>,
    interest: watch::Sender<Interest>,
    unregistered: watch::Sender<bool>,
}

impl InterestNotificationMultiplexer {
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        let (interest, _) = watch::channel(Interest::None);
        let (unregistered, _) = watch::channel(false);
        Self {
            registry,
            interest,
            unregistered,
        }
    }

    /// Interest currently applied to the feed.
    pub fn interest(&self) -> Interest {
        self.interest.borrow().clone()
    }
}

struct Feed {
    changes: broadcast::Receiver<RegistryChange>,
    interest: watch::Receiver<Interest>,
    unregistered: watch::Receiver<bool>,
    failed: bool,
}

impl Feed {
    async fn next(&mut self) -> Option<Result<ChangeNotification, MultiplexerError>> {
        if self.failed {
            return None;
        }
        loop {
            let stopped = *self.unregistered.borrow_and_update();
            if stopped {
                return None;
            }
            tokio::select! {
                biased;
                changed = self.unregistered.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                received = self.changes.recv() => match received {
                    Ok(change) => {
                        if let Some(notification) = self.scope(change) {
                            return Some(Ok(notification));
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Change feed lagged, {} changes missed", missed);
                        self.failed = true;
                        return Some(Err(MultiplexerError::Lagged(missed)));
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }

    /// Translate `change` into what this subscriber sees, if anything.
    fn scope(&self, change: RegistryChange) -> Option<ChangeNotification> {
        let interest = self.interest.borrow();
        let now = interest.matches(&change.instance);
        let before = change
            .previous
            .as_deref()
            .map_or(now, |previous| interest.matches(previous));
        drop(interest);

        match (before, now) {
            (true, true) => Some(change.notification),
            (false, true) => Some(ChangeNotification::Add((*change.instance).clone())),
            (true, false) => Some(ChangeNotification::Delete(change.instance.id.clone())),
            (false, false) => None,
        }
    }
}

impl NotificationMultiplexer for InterestNotificationMultiplexer {
    fn change_notifications(&self) -> NotificationStream {
        let feed = Feed {
            changes: self.registry.subscribe(),
            interest: self.interest.subscribe(),
            unregistered: self.unregistered.subscribe(),
            failed: false,
        };
        futures::stream::unfold(feed, |mut feed| async move {
            let item = feed.next().await?;
            Some((item, feed))
        })
        .boxed()
    }

    fn update(&self, interest: Interest) {
        debug!(interest = ?interest, "Multiplexer interest updated");
        self.interest.send_replace(interest);
    }

    fn unregister(&self) {
        self.unregistered.send_replace(true);
    }
}
