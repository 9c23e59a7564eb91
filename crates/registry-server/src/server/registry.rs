// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Instance registry for the registry server.
//!
//! One [`Lease`] per instance id, keyed in a concurrent map. Every change is
//! published on a broadcast feed that the per-channel multiplexers filter.
//! Changes to one id are applied and published under that id's map entry
//! guard, so the feed carries them in the order they were applied.

use dashmap::mapref::entry::{Entry, OccupiedEntry};
use dashmap::DashMap;
use registry_core::{ChangeNotification, InstanceInfo, Lease, LeaseError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

type LeaseEntry<'a> = OccupiedEntry<'a, String, Arc<Lease<InstanceInfo>>>;

/// One registry change together with the instance it concerns.
///
/// For deletes, `instance` is the last known state, so interests can still
/// be matched against it. For modifies, `previous` is the state the deltas
/// apply to.
#[derive(Debug, Clone)]
pub struct RegistryChange {
    pub notification: ChangeNotification,
    pub instance: Arc<InstanceInfo>,
    pub previous: Option<Arc<InstanceInfo>>,
}

/// What [`InstanceRegistry::register`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// New instance, `Add` published.
    Added,
    /// Content changed, `Modify` published.
    Updated,
    /// Same content, lease renewed only.
    Renewed,
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Instance {0} is not registered")]
    NotRegistered(String),

    #[error(transparent)]
    Lease(#[from] LeaseError),
}

/// Leased instance registry.
pub struct InstanceRegistry {
    leases: DashMap<String, Arc<Lease<InstanceInfo>>>,
    changes: broadcast::Sender<RegistryChange>,
}

impl InstanceRegistry {
    /// Create an empty registry; `change_feed_capacity` bounds how far a
    /// subscriber may fall behind before it lags.
    pub fn new(change_feed_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(change_feed_capacity.max(1));
        Self {
            leases: DashMap::new(),
            changes,
        }
    }

    /// Register or update an instance and (re)start its lease.
    pub fn register(
        &self,
        instance: InstanceInfo,
        duration: Duration,
    ) -> Result<RegisterOutcome, RegistryError> {
        if duration.is_zero() {
            return Err(LeaseError::ZeroDuration(duration).into());
        }

        let occupied = match self.leases.entry(instance.id.clone()) {
            Entry::Vacant(vacant) => {
                let lease = Arc::new(Lease::with_duration(instance, duration)?);
                let holder = lease.holder();
                let _guard = vacant.insert(lease);
                debug!("Registered instance {}", holder.id);
                self.publish(ChangeNotification::Add((*holder).clone()), holder, None);
                return Ok(RegisterOutcome::Added);
            }
            Entry::Occupied(occupied) => occupied,
        };

        // The entry guard is held until return, serializing updates to this id.
        let lease = occupied.get();
        lease.renew_with(duration)?;

        let update = Arc::new(instance);
        loop {
            let current = lease.holder();
            let deltas = current.diff(&update);
            if deltas.is_empty() {
                debug!("Renewed instance {}", update.id);
                return Ok(RegisterOutcome::Renewed);
            }
            if lease.compare_and_set(&current, Arc::clone(&update)) {
                debug!("Updated instance {} ({} deltas)", update.id, deltas.len());
                self.publish(
                    ChangeNotification::Modify((*update).clone(), deltas),
                    update,
                    Some(current),
                );
                return Ok(RegisterOutcome::Updated);
            }
        }
    }

    /// Renew an instance's lease, optionally with a new duration.
    pub fn renew(&self, id: &str, duration: Option<Duration>) -> Result<(), RegistryError> {
        let lease = self
            .lease(id)
            .ok_or_else(|| RegistryError::NotRegistered(id.to_string()))?;
        match duration {
            Some(duration) => lease.renew_with(duration)?,
            None => lease.renew(),
        }
        Ok(())
    }

    /// Remove an instance; returns its last known state.
    pub fn unregister(&self, id: &str) -> Option<Arc<InstanceInfo>> {
        match self.leases.entry(id.to_string()) {
            Entry::Occupied(occupied) => {
                debug!("Unregistered instance {}", id);
                Some(self.retire(occupied))
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Remove every instance whose lease has expired.
    ///
    /// An entry renewed between the scan and its removal is kept.
    pub fn evict_expired(&self) -> Vec<String> {
        let candidates: Vec<String> = self
            .leases
            .iter()
            .filter(|entry| entry.value().has_expired())
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Entry::Occupied(occupied) = self.leases.entry(id) {
                if occupied.get().has_expired() {
                    evicted.push(occupied.key().clone());
                    self.retire(occupied);
                }
            }
        }
        evicted
    }

    pub fn get(&self, id: &str) -> Option<Arc<InstanceInfo>> {
        self.leases.get(id).map(|entry| entry.value().holder())
    }

    pub fn lease(&self, id: &str) -> Option<Arc<Lease<InstanceInfo>>> {
        self.leases.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of all registered instances.
    pub fn instances(&self) -> Vec<Arc<InstanceInfo>> {
        self.leases
            .iter()
            .map(|entry| entry.value().holder())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Subscribe to changes published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.changes.subscribe()
    }

    // Publishes before the entry guard is released.
    fn retire(&self, occupied: LeaseEntry<'_>) -> Arc<InstanceInfo> {
        let lease = occupied.get();
        lease.cancel();
        let holder = lease.holder();
        self.publish(
            ChangeNotification::Delete(holder.id.clone()),
            Arc::clone(&holder),
            None,
        );
        occupied.remove();
        holder
    }

    fn publish(
        &self,
        notification: ChangeNotification,
        instance: Arc<InstanceInfo>,
        previous: Option<Arc<InstanceInfo>>,
    ) {
        // No subscribers is fine.
        let _ = self.changes.send(RegistryChange {
            notification,
            instance,
            previous,
        });
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new(1024)
    }
}
