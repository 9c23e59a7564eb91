// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Expiring liveness lease over a registered element.
//!
//! A [`Lease`] is renewed by heartbeats, read by the expiry sweep and has its
//! holder swapped when two registrations for the same element race. Those
//! three actors never block each other: every attribute lives in its own
//! atomic cell.
//!
//! # Tearing
//!
//! There is no cross-field transaction. [`Lease::renew_with`] stores the new
//! duration and then the new timestamp as two separate writes, so a
//! concurrent [`Lease::has_expired`] may observe the new duration paired with
//! the old timestamp for a moment. Callers must tolerate that window.
//!
//! # Clock
//!
//! Expiry is computed against wall-clock milliseconds. No monotonic clock and
//! no cross-node skew correction is used.

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Lease duration used when the registrant does not ask for one (90 s).
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(90);

/// Lease errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseError {
    #[error("Lease duration must be at least 1 ms (got {0:?})")]
    ZeroDuration(Duration),
}

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(duration_to_millis)
            .unwrap_or(0)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_millis(&self) -> u64 {
        (**self).now_millis()
    }
}

fn duration_to_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn checked_duration_millis(d: Duration) -> Result<u64, LeaseError> {
    match duration_to_millis(d) {
        0 => Err(LeaseError::ZeroDuration(d)),
        ms => Ok(ms),
    }
}

/// Lease over a holder `E`.
///
/// The holder is stored behind an `Arc`; the `Arc` pointer is the identity
/// token used by [`Lease::compare_and_set`], so swapping never runs a full
/// value comparison.
pub struct Lease<E, C: Clock = SystemClock> {
    holder: ArcSwap<E>,
    last_renewal_ms: AtomicU64,
    duration_ms: AtomicU64,
    clock: C,
}

impl<E> Lease<E> {
    /// Create a lease with [`DEFAULT_LEASE_DURATION`].
    pub fn new(holder: E) -> Self {
        Self {
            holder: ArcSwap::from_pointee(holder),
            last_renewal_ms: AtomicU64::new(SystemClock.now_millis()),
            duration_ms: AtomicU64::new(duration_to_millis(DEFAULT_LEASE_DURATION)),
            clock: SystemClock,
        }
    }

    /// Create a lease with an explicit duration.
    pub fn with_duration(holder: E, duration: Duration) -> Result<Self, LeaseError> {
        Self::with_clock(holder, duration, SystemClock)
    }
}

impl<E, C: Clock> Lease<E, C> {
    /// Create a lease reading time from `clock`.
    pub fn with_clock(holder: E, duration: Duration, clock: C) -> Result<Self, LeaseError> {
        let duration_ms = checked_duration_millis(duration)?;
        let now = clock.now_millis();
        Ok(Self {
            holder: ArcSwap::from_pointee(holder),
            last_renewal_ms: AtomicU64::new(now),
            duration_ms: AtomicU64::new(duration_ms),
            clock,
        })
    }

    /// Current holder.
    pub fn holder(&self) -> Arc<E> {
        self.holder.load_full()
    }

    /// Replace the holder with `update` only if the current holder is
    /// `expected` (same allocation).
    ///
    /// Returns `true` on success. On failure nothing changes.
    pub fn compare_and_set(&self, expected: &Arc<E>, update: Arc<E>) -> bool {
        let previous = self.holder.compare_and_swap(expected, update);
        Arc::ptr_eq(&*previous, expected)
    }

    /// Timestamp (ms since epoch) of the last renewal.
    pub fn last_renewal_timestamp(&self) -> u64 {
        self.last_renewal_ms.load(Ordering::Acquire)
    }

    /// Current lease duration.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms.load(Ordering::Acquire))
    }

    /// Renew the lease from now.
    ///
    /// The stored timestamp never moves backwards, even if the wall clock does.
    pub fn renew(&self) {
        let now = self.clock.now_millis();
        self.last_renewal_ms.fetch_max(now, Ordering::AcqRel);
    }

    /// Change the duration, then renew. See the module docs on tearing.
    pub fn renew_with(&self, duration: Duration) -> Result<(), LeaseError> {
        let duration_ms = checked_duration_millis(duration)?;
        self.duration_ms.store(duration_ms, Ordering::Release);
        self.renew();
        Ok(())
    }

    /// `true` once the current time is past `last renewal + duration`.
    pub fn has_expired(&self) -> bool {
        let deadline = self
            .last_renewal_ms
            .load(Ordering::Acquire)
            .saturating_add(self.duration_ms.load(Ordering::Acquire));
        self.clock.now_millis() > deadline
    }

    /// Lifecycle hook invoked when the owner drops the lease.
    ///
    /// Has no effect on the lease itself; removing it from whatever collection
    /// holds it is up to the caller.
    pub fn cancel(&self) {}
}

impl<E: std::fmt::Debug, C: Clock> std::fmt::Debug for Lease<E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("holder", &self.holder.load())
            .field("last_renewal_ms", &self.last_renewal_timestamp())
            .field("duration", &self.duration())
            .finish()
    }
}
