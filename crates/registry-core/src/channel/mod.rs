// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection channels.
//!
//! Every channel is a small state machine sitting on one
//! [`MessageConnection`]. [`ChannelCore`] holds what all channels share: the
//! identity, the state cell, the transport and the helpers that push control
//! messages without making the caller wait for them.
//!
//! Control messages go through one outbound queue per channel and reach the
//! transport in the order they were issued. [`ChannelCore::new`] spawns the
//! task draining that queue and must be called from within a Tokio runtime.

use crate::error::{ChannelError, MultiplexerError, TransportError};
use crate::protocol::ServerMessage;
use crate::transport::{AckFuture, InboundStream, MessageConnection};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

pub mod interest;

pub use interest::{InterestChannel, InterestState};

/// Channel identity, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl ChannelId {
    /// Allocate the next id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Channel state enum storable in a [`StateCell`].
pub trait ChannelState: Copy + Eq + std::fmt::Debug + Send + Sync + 'static {
    fn to_raw(self) -> u8;
    fn from_raw(raw: u8) -> Self;
}

/// Single atomic cell holding a channel state.
///
/// Plain `get`/`set` for transitions driven by the (sequential) inbound
/// handler; `compare_and_set` for the transitions that can race with it.
pub struct StateCell<S> {
    raw: AtomicU8,
    _state: PhantomData<fn() -> S>,
}

impl<S: ChannelState> StateCell<S> {
    pub fn new(initial: S) -> Self {
        Self {
            raw: AtomicU8::new(initial.to_raw()),
            _state: PhantomData,
        }
    }

    pub fn get(&self) -> S {
        S::from_raw(self.raw.load(Ordering::Acquire))
    }

    pub fn set(&self, state: S) {
        self.raw.store(state.to_raw(), Ordering::Release);
    }

    /// Move from `current` to `new`; `false` if the cell held something else.
    pub fn compare_and_set(&self, current: S, new: S) -> bool {
        self.raw
            .compare_exchange(
                current.to_raw(),
                new.to_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl<S: ChannelState> std::fmt::Debug for StateCell<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StateCell").field(&self.get()).finish()
    }
}

/// A send the channel drives to completion on its own.
///
/// Awaiting it yields the send's outcome; dropping it does not cancel the
/// send.
pub struct PendingAck {
    done: oneshot::Receiver<Result<(), TransportError>>,
}

impl Future for PendingAck {
    type Output = Result<(), ChannelError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.done).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result.map_err(ChannelError::from)),
            // Queue drained without running the send.
            Poll::Ready(Err(_)) => {
                Poll::Ready(Err(ChannelError::Transport(TransportError::Closed)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Outbound {
    send: AckFuture,
    what: &'static str,
    done: oneshot::Sender<Result<(), TransportError>>,
}

/// Run queued sends one at a time, in queue order.
async fn drain_outbound(id: ChannelId, mut queue: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(Outbound { send, what, done }) = queue.recv().await {
        let result = send.await;
        if let Err(ref e) = result {
            warn!(channel = %id, "Failed to send {}: {}", what, e);
        }
        let _ = done.send(result);
    }
    debug!(channel = %id, "Outbound queue drained");
}

/// Shared channel plumbing.
pub struct ChannelCore<S: ChannelState> {
    id: ChannelId,
    state: StateCell<S>,
    transport: Arc<dyn MessageConnection>,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed_tx: watch::Sender<bool>,
}

impl<S: ChannelState> ChannelCore<S> {
    /// Create the core in its initial state and start its outbound queue.
    pub fn new(id: ChannelId, initial: S, transport: Arc<dyn MessageConnection>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        let (outbound, queue) = mpsc::unbounded_channel();
        tokio::spawn(drain_outbound(id, queue));
        Self {
            id,
            state: StateCell::new(initial),
            transport,
            outbound,
            closed_tx,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn state(&self) -> S {
        self.state.get()
    }

    pub fn set_state(&self, state: S) {
        self.state.set(state);
    }

    pub fn state_cell(&self) -> &StateCell<S> {
        &self.state
    }

    pub fn transport(&self) -> &Arc<dyn MessageConnection> {
        &self.transport
    }

    /// Take the transport's inbound stream.
    pub fn subscribe_to_transport_input(&self) -> Result<InboundStream, ChannelError> {
        self.transport
            .subscribe_inbound()
            .ok_or(ChannelError::InboundUnavailable)
    }

    /// Queue `send` behind every send queued before it; failures are logged.
    pub fn subscribe_to_transport_send(&self, send: AckFuture, what: &'static str) -> PendingAck {
        let (done, rx) = oneshot::channel();
        let queued = Outbound { send, what, done };
        if self.outbound.send(queued).is_err() {
            warn!(channel = %self.id, "Outbound queue gone, dropping {}", what);
        }
        PendingAck { done: rx }
    }

    pub fn send_ack_on_transport(&self) -> PendingAck {
        self.subscribe_to_transport_send(self.transport.acknowledge(), "acknowledgement")
    }

    pub fn send_error_on_transport(&self, error: &ChannelError) -> PendingAck {
        self.subscribe_to_transport_send(self.transport.submit(error.to_wire()), "error")
    }

    pub fn send_on_complete_on_transport(&self) -> PendingAck {
        self.subscribe_to_transport_send(
            self.transport.submit(ServerMessage::StreamComplete),
            "stream completion",
        )
    }

    pub fn send_stream_error_on_transport(&self, error: &MultiplexerError) -> PendingAck {
        self.subscribe_to_transport_send(
            self.transport.submit(ServerMessage::StreamError {
                message: error.to_string(),
            }),
            "stream error",
        )
    }

    /// Shut the transport down and wake everyone waiting in [`closed`](Self::closed).
    pub fn close_transport(&self) {
        self.transport.shutdown();
        self.closed_tx.send_replace(true);
    }

    /// Resolves once [`close_transport`](Self::close_transport) has run.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
