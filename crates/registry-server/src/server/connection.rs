// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefixed JSON message connection.
//!
//! Every frame is a 4-byte big-endian length followed by a JSON body. The
//! peer acknowledges each message submitted with [`submit_with_ack`]; acks
//! carry no correlation id, so they are matched to pending sends in FIFO
//! order.
//!
//! [`submit_with_ack`]: MessageConnection::submit_with_ack

use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use registry_core::{
    AckFuture, ClientMessage, InboundStream, MessageConnection, ServerMessage, TransportError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Inbound messages buffered ahead of the channel handler.
const INBOUND_BUFFER: usize = 256;

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    pub max_message_size: usize,
    pub ack_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024,
            ack_timeout: Duration::from_secs(10),
        }
    }
}

/// Read one frame.
///
/// Returns `Ok(None)` if the stream ends cleanly before a length prefix.
pub async fn read_frame<R, T>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_message_size: usize,
) -> Result<Option<T>, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    // Read length prefix (4 bytes, big-endian)
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len == 0 {
        return Err(TransportError::Protocol("Empty message".into()));
    }
    if len > max_message_size {
        return Err(TransportError::Protocol(format!(
            "Message too large: {} > {}",
            len, max_message_size
        )));
    }

    buf.clear();
    buf.resize(len, 0);
    reader.read_exact(&mut buf[..]).await?;

    let message = serde_json::from_slice(buf)
        .map_err(|e| TransportError::Protocol(format!("Invalid JSON: {}", e)))?;

    Ok(Some(message))
}

/// Write one frame and flush.
pub async fn write_frame<W, T>(
    writer: &mut W,
    message: &T,
    max_message_size: usize,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let json = serde_json::to_vec(message)
        .map_err(|e| TransportError::Protocol(format!("Serialize error: {}", e)))?;

    if json.len() > max_message_size {
        return Err(TransportError::Protocol(format!(
            "Message too large: {} > {}",
            json.len(),
            max_message_size
        )));
    }

    let len = json.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;

    Ok(())
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct Shared {
    peer: String,
    options: ConnectionOptions,
    writer: tokio::sync::Mutex<Writer>,
    pending_acks: Mutex<VecDeque<oneshot::Sender<()>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    peer_gone: AtomicBool,
}

impl Shared {
    fn is_usable(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.peer_gone.load(Ordering::Acquire)
    }

    fn shutdown(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        // Dropping the senders fails every pending ack with `Closed`.
        self.pending_acks.lock().clear();

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let mut writer = shared.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!("Write half of {} already gone: {}", shared.peer, e);
            }
        });

        debug!("Connection shut down: {}", self.peer);
    }

    fn complete_ack(&self) {
        match self.pending_acks.lock().pop_front() {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => warn!("Unsolicited acknowledgement from {}", self.peer),
        }
    }
}

/// [`MessageConnection`] over any byte stream.
pub struct FramedConnection {
    shared: Arc<Shared>,
    inbound: Mutex<Option<mpsc::Receiver<ClientMessage>>>,
}

impl FramedConnection {
    /// Wrap `stream` and start reading from it.
    pub fn new<S>(stream: S, peer: impl Into<String>, options: ConnectionOptions) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);

        let shared = Arc::new(Shared {
            peer: peer.into(),
            options,
            writer: tokio::sync::Mutex::new(Box::new(write_half)),
            pending_acks: Mutex::new(VecDeque::new()),
            reader_task: Mutex::new(None),
            closed: AtomicBool::new(false),
            peer_gone: AtomicBool::new(false),
        });

        let task = tokio::spawn(read_loop(read_half, inbound_tx, Arc::clone(&shared)));
        *shared.reader_task.lock() = Some(task);

        Arc::new(Self {
            shared,
            inbound: Mutex::new(Some(inbound_rx)),
        })
    }

    /// Peer label used in logs.
    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    /// Sends still waiting for the peer's acknowledgement.
    pub fn pending_acks(&self) -> usize {
        self.shared.pending_acks.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

async fn read_loop<R>(mut reader: R, inbound: mpsc::Sender<ClientMessage>, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(4096);
    let max_message_size = shared.options.max_message_size;

    loop {
        match read_frame::<_, ClientMessage>(&mut reader, &mut buf, max_message_size).await {
            Ok(Some(ClientMessage::Acknowledgement)) => shared.complete_ack(),
            Ok(Some(message)) => {
                if inbound.send(message).await.is_err() {
                    debug!("Inbound receiver for {} dropped", shared.peer);
                    break;
                }
            }
            Ok(None) => {
                info!("Connection closed: {}", shared.peer);
                break;
            }
            Err(e) => {
                warn!("Read error from {}: {}", shared.peer, e);
                break;
            }
        }
    }

    shared.peer_gone.store(true, Ordering::Release);
    shared.pending_acks.lock().clear();
}

impl MessageConnection for FramedConnection {
    fn submit_with_ack(&self, message: ServerMessage) -> AckFuture {
        let shared = Arc::clone(&self.shared);
        async move {
            if !shared.is_usable() {
                return Err(TransportError::Closed);
            }

            let ack = {
                let mut writer = shared.writer.lock().await;
                let (tx, rx) = oneshot::channel();
                shared.pending_acks.lock().push_back(tx);
                if let Err(e) =
                    write_frame(&mut *writer, &message, shared.options.max_message_size).await
                {
                    shared.pending_acks.lock().pop_back();
                    return Err(e);
                }
                rx
            };
            debug!("Sent {} to {}, awaiting ack", message.name(), shared.peer);

            let timeout = shared.options.ack_timeout;
            match tokio::time::timeout(timeout, ack).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(TransportError::Closed),
                Err(_) => {
                    warn!(
                        "No acknowledgement from {} within {:?}, closing",
                        shared.peer, timeout
                    );
                    shared.shutdown();
                    Err(TransportError::AckTimeout(timeout))
                }
            }
        }
        .boxed()
    }

    fn submit(&self, message: ServerMessage) -> AckFuture {
        let shared = Arc::clone(&self.shared);
        async move {
            if shared.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            let mut writer = shared.writer.lock().await;
            write_frame(&mut *writer, &message, shared.options.max_message_size).await
        }
        .boxed()
    }

    fn subscribe_inbound(&self) -> Option<InboundStream> {
        let rx = self.inbound.lock().take()?;
        Some(
            futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|message| (message, rx))
            })
            .boxed(),
        )
    }

    fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl Drop for FramedConnection {
    fn drop(&mut self) {
        if let Some(task) = self.shared.reader_task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_core::InstanceInfo;
    use tokio::io::DuplexStream;

    fn options(ack_timeout: Duration) -> ConnectionOptions {
        ConnectionOptions {
            max_message_size: 64 * 1024,
            ack_timeout,
        }
    }

    async fn next_frame(peer: &mut DuplexStream) -> ServerMessage {
        let mut buf = Vec::new();
        read_frame(peer, &mut buf, 64 * 1024).await.unwrap().unwrap()
    }

    async fn send_frame(peer: &mut DuplexStream, message: &ClientMessage) {
        write_frame(peer, message, 64 * 1024).await.unwrap();
    }

    #[tokio::test]
    async fn test_frame_roundtrip_and_eof() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &ClientMessage::Heartbeat, 1024).await.unwrap();
        drop(a);

        let mut buf = Vec::new();
        let first: Option<ClientMessage> = read_frame(&mut b, &mut buf, 1024).await.unwrap();
        assert_eq!(first, Some(ClientMessage::Heartbeat));

        let end: Option<ClientMessage> = read_frame(&mut b, &mut buf, 1024).await.unwrap();
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn test_frame_limits() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&0u32.to_be_bytes()).await.unwrap();
        let mut buf = Vec::new();
        let empty: Result<Option<ClientMessage>, _> = read_frame(&mut b, &mut buf, 1024).await;
        assert!(matches!(empty, Err(TransportError::Protocol(_))));

        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&4096u32.to_be_bytes()).await.unwrap();
        let large: Result<Option<ClientMessage>, _> = read_frame(&mut b, &mut buf, 1024).await;
        assert!(matches!(large, Err(TransportError::Protocol(_))));

        let instance = InstanceInfo::new("i-1", "a".repeat(2048));
        let oversized = ServerMessage::AddInstance { instance };
        let result = write_frame(&mut a, &oversized, 1024).await;
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_submit_with_ack_is_lazy() {
        let (server, mut peer) = tokio::io::duplex(64 * 1024);
        let conn = FramedConnection::new(server, "peer", options(Duration::from_secs(5)));

        let send = conn.submit_with_ack(ServerMessage::StreamComplete);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(conn.pending_acks(), 0);

        let handle = tokio::spawn(send);
        assert_eq!(next_frame(&mut peer).await, ServerMessage::StreamComplete);
        assert_eq!(conn.pending_acks(), 1);

        send_frame(&mut peer, &ClientMessage::Acknowledgement).await;
        assert_eq!(handle.await.unwrap(), Ok(()));
        assert_eq!(conn.pending_acks(), 0);
    }

    #[tokio::test]
    async fn test_acks_complete_in_fifo_order() {
        let (server, mut peer) = tokio::io::duplex(64 * 1024);
        let conn = FramedConnection::new(server, "peer", options(Duration::from_secs(5)));

        let first = tokio::spawn(conn.submit_with_ack(ServerMessage::Acknowledgement));
        assert_eq!(next_frame(&mut peer).await, ServerMessage::Acknowledgement);
        let second = tokio::spawn(conn.submit_with_ack(ServerMessage::StreamComplete));
        assert_eq!(next_frame(&mut peer).await, ServerMessage::StreamComplete);

        send_frame(&mut peer, &ClientMessage::Acknowledgement).await;
        assert_eq!(first.await.unwrap(), Ok(()));
        assert!(!second.is_finished());

        send_frame(&mut peer, &ClientMessage::Acknowledgement).await;
        assert_eq!(second.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_inbound_excludes_acknowledgements() {
        let (server, mut peer) = tokio::io::duplex(64 * 1024);
        let conn = FramedConnection::new(server, "peer", options(Duration::from_secs(5)));
        let mut inbound = conn.subscribe_inbound().unwrap();
        assert!(conn.subscribe_inbound().is_none());

        send_frame(&mut peer, &ClientMessage::Heartbeat).await;
        send_frame(&mut peer, &ClientMessage::Acknowledgement).await;
        send_frame(&mut peer, &ClientMessage::Unregister).await;
        drop(peer);

        assert_eq!(inbound.next().await, Some(ClientMessage::Heartbeat));
        assert_eq!(inbound.next().await, Some(ClientMessage::Unregister));
        assert_eq!(inbound.next().await, None);
    }

    #[tokio::test]
    async fn test_ack_timeout_shuts_connection_down() {
        let (server, mut peer) = tokio::io::duplex(64 * 1024);
        let conn = FramedConnection::new(server, "peer", options(Duration::from_millis(50)));

        let send = tokio::spawn(conn.submit_with_ack(ServerMessage::StreamComplete));
        assert_eq!(next_frame(&mut peer).await, ServerMessage::StreamComplete);

        let result = send.await.unwrap();
        assert_eq!(result, Err(TransportError::AckTimeout(Duration::from_millis(50))));
        assert!(conn.is_closed());

        let after = conn.submit(ServerMessage::Acknowledgement).await;
        assert_eq!(after, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_acks() {
        let (server, mut peer) = tokio::io::duplex(64 * 1024);
        let conn = FramedConnection::new(server, "peer", options(Duration::from_secs(5)));

        let send = tokio::spawn(conn.submit_with_ack(ServerMessage::StreamComplete));
        assert_eq!(next_frame(&mut peer).await, ServerMessage::StreamComplete);

        conn.shutdown();
        conn.shutdown();
        assert_eq!(send.await.unwrap(), Err(TransportError::Closed));

        let mut buf = Vec::new();
        let end: Option<ServerMessage> = read_frame(&mut peer, &mut buf, 1024).await.unwrap();
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn test_peer_disconnect_fails_pending_acks() {
        let (server, mut peer) = tokio::io::duplex(64 * 1024);
        let conn = FramedConnection::new(server, "peer", options(Duration::from_secs(5)));

        let send = tokio::spawn(conn.submit_with_ack(ServerMessage::StreamComplete));
        assert_eq!(next_frame(&mut peer).await, ServerMessage::StreamComplete);
        drop(peer);

        assert_eq!(send.await.unwrap(), Err(TransportError::Closed));
    }
}
