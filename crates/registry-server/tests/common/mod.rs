// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire-level test peer.

#![allow(dead_code)]

use registry_core::{ClientMessage, ServerMessage};
use registry_server::server::connection::{read_frame, write_frame};
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Client side of a registry connection.
pub struct TestClient<S> {
    stream: S,
    buf: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> TestClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    pub async fn send(&mut self, message: ClientMessage) {
        self.send_raw(&message).await;
    }

    /// Send any serializable value as one frame.
    pub async fn send_raw<T: Serialize>(&mut self, message: &T) {
        write_frame(&mut self.stream, message, MAX_MESSAGE_SIZE)
            .await
            .expect("write frame");
    }

    pub async fn ack(&mut self) {
        self.send(ClientMessage::Acknowledgement).await;
    }

    /// Next message; panics after two seconds.
    pub async fn recv(&mut self) -> ServerMessage {
        match self.recv_within(Duration::from_secs(2)).await {
            Some(message) => message,
            None => panic!("no message within 2s"),
        }
    }

    /// Next message, or `None` if nothing arrives in time or the connection ends.
    pub async fn recv_within(&mut self, timeout: Duration) -> Option<ServerMessage> {
        let read = read_frame(&mut self.stream, &mut self.buf, MAX_MESSAGE_SIZE);
        match tokio::time::timeout(timeout, read).await {
            Ok(result) => result.ok().flatten(),
            Err(_) => None,
        }
    }

    /// Receive a data message and acknowledge it.
    pub async fn recv_and_ack(&mut self) -> ServerMessage {
        let message = self.recv().await;
        self.ack().await;
        message
    }
}
