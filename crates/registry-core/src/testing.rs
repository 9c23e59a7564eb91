// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory collaborators for channel tests.

use crate::error::{MultiplexerError, TransportError};
use crate::interest::Interest;
use crate::multiplexer::{NotificationMultiplexer, NotificationStream};
use crate::notification::ChangeNotification;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::{AckFuture, InboundStream, MessageConnection};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Poll `condition` until it holds; panic after two seconds.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}

fn receiver_stream<T: Send + 'static>(
    rx: mpsc::UnboundedReceiver<T>,
) -> futures::stream::BoxStream<'static, T> {
    use futures::StreamExt;
    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
        .boxed()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SendEvent {
    Started(ServerMessage),
    Acked(ServerMessage),
}

#[derive(Default)]
struct Recorded {
    sent: Vec<ServerMessage>,
    acked: Vec<ServerMessage>,
    ack_events: Vec<SendEvent>,
    fail_next_ack: Option<TransportError>,
}

/// Transport that records every write and acknowledges sends itself.
pub(crate) struct RecordingTransport {
    recorded: Arc<Mutex<Recorded>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientMessage>>>,
    shutdowns: AtomicUsize,
    ack_delay: Duration,
}

impl RecordingTransport {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_ack_delay(Duration::ZERO)
    }

    pub(crate) fn with_ack_delay(ack_delay: Duration) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            recorded: Arc::new(Mutex::new(Recorded::default())),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: Mutex::new(Some(rx)),
            shutdowns: AtomicUsize::new(0),
            ack_delay,
        })
    }

    pub(crate) fn push_inbound(&self, message: ClientMessage) {
        if let Some(tx) = self.inbound_tx.lock().as_ref() {
            let _ = tx.send(message);
        }
    }

    pub(crate) fn end_inbound(&self) {
        self.inbound_tx.lock().take();
    }

    pub(crate) fn fail_next_ack(&self, error: TransportError) {
        self.recorded.lock().fail_next_ack = Some(error);
    }

    pub(crate) fn sent(&self) -> Vec<ServerMessage> {
        self.recorded.lock().sent.clone()
    }

    pub(crate) fn acked(&self) -> Vec<ServerMessage> {
        self.recorded.lock().acked.clone()
    }

    pub(crate) fn ack_events(&self) -> Vec<SendEvent> {
        self.recorded.lock().ack_events.clone()
    }

    pub(crate) fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl MessageConnection for RecordingTransport {
    fn submit_with_ack(&self, message: ServerMessage) -> AckFuture {
        let recorded = self.recorded.clone();
        let delay = self.ack_delay;
        async move {
            let failure = {
                let mut r = recorded.lock();
                r.sent.push(message.clone());
                let failure = r.fail_next_ack.take();
                if failure.is_none() {
                    r.ack_events.push(SendEvent::Started(message.clone()));
                }
                failure
            };
            if let Some(error) = failure {
                return Err(error);
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut r = recorded.lock();
            r.ack_events.push(SendEvent::Acked(message.clone()));
            r.acked.push(message);
            Ok(())
        }
        .boxed()
    }

    fn submit(&self, message: ServerMessage) -> AckFuture {
        let recorded = self.recorded.clone();
        async move {
            recorded.lock().sent.push(message);
            Ok(())
        }
        .boxed()
    }

    fn subscribe_inbound(&self) -> Option<InboundStream> {
        self.inbound_rx.lock().take().map(receiver_stream)
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

type Item = Result<ChangeNotification, MultiplexerError>;

#[derive(Default)]
struct ScriptedInner {
    tx: Mutex<Option<mpsc::UnboundedSender<Item>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Item>>>,
    interests: Mutex<Vec<Interest>>,
    subscriptions: AtomicUsize,
    unregistrations: AtomicUsize,
}

/// Multiplexer whose change sequence is fed by the test.
#[derive(Clone)]
pub(crate) struct ScriptedMultiplexer {
    inner: Arc<ScriptedInner>,
}

impl ScriptedMultiplexer {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = ScriptedInner::default();
        *inner.tx.lock() = Some(tx);
        *inner.rx.lock() = Some(rx);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn emit(&self, notification: ChangeNotification) {
        if let Some(tx) = self.inner.tx.lock().as_ref() {
            let _ = tx.send(Ok(notification));
        }
    }

    pub(crate) fn fail(&self, error: MultiplexerError) {
        if let Some(tx) = self.inner.tx.lock().take() {
            let _ = tx.send(Err(error));
        }
    }

    pub(crate) fn complete(&self) {
        self.inner.tx.lock().take();
    }

    pub(crate) fn interests(&self) -> Vec<Interest> {
        self.inner.interests.lock().clone()
    }

    pub(crate) fn subscriptions(&self) -> usize {
        self.inner.subscriptions.load(Ordering::SeqCst)
    }

    pub(crate) fn unregistrations(&self) -> usize {
        self.inner.unregistrations.load(Ordering::SeqCst)
    }
}

impl NotificationMultiplexer for ScriptedMultiplexer {
    fn change_notifications(&self) -> NotificationStream {
        self.inner.subscriptions.fetch_add(1, Ordering::SeqCst);
        match self.inner.rx.lock().take() {
            Some(rx) => receiver_stream(rx),
            None => {
                use futures::StreamExt;
                futures::stream::empty().boxed()
            }
        }
    }

    fn update(&self, interest: Interest) {
        self.inner.interests.lock().push(interest);
    }

    fn unregister(&self) {
        self.inner.unregistrations.fetch_add(1, Ordering::SeqCst);
        self.inner.tx.lock().take();
    }
}
