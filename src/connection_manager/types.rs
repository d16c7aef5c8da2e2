//! Connection handle and related types

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{close_code, Utf8Bytes};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::websocket::OutboundMessage;

/// Lifecycle of a client connection.
///
/// Only forward transitions are legal; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Authenticating = 1,
    Open = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Open)
                | (Authenticating, Closing)
                | (Open, Closing)
                | (Closing, Closed)
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Authenticating,
            2 => Self::Open,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single delivery to a connection failed
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection is {0}")]
    NotOpen(ConnectionState),
    #[error("outbound queue closed")]
    Closed,
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// Handle for a single WebSocket connection
pub struct ConnectionHandle {
    pub id: Uuid,
    pub peer_addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    opened: Instant,
    sender: mpsc::Sender<OutboundMessage>,
    state: AtomicU8,
    close_code: AtomicU16,
    close_signal: Notify,
}

impl ConnectionHandle {
    /// Create a handle for a connection that has already passed authentication.
    pub fn new(sender: mpsc::Sender<OutboundMessage>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer_addr,
            connected_at: Utc::now(),
            opened: Instant::now(),
            sender,
            state: AtomicU8::new(ConnectionState::Open as u8),
            close_code: AtomicU16::new(close_code::NORMAL),
            close_signal: Notify::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Time since the connection was accepted
    pub fn age(&self) -> Duration {
        self.opened.elapsed()
    }

    /// Move to `next` if the lifecycle allows it. Returns false otherwise.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut current = self.state();
        loop {
            if !current.can_transition_to(next) {
                return false;
            }
            match self.state.compare_exchange_weak(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = ConnectionState::from_u8(actual),
            }
        }
    }

    /// Queue a text frame for the writer task.
    pub async fn send_text(&self, text: Utf8Bytes, timeout: Duration) -> Result<(), DeliveryError> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(DeliveryError::NotOpen(state));
        }

        match tokio::time::timeout(timeout, self.sender.send(OutboundMessage::Text(text))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::Closed),
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        }
    }

    /// Queue a close frame without waiting. Fails if the queue is full or gone.
    pub fn try_send_close(&self, code: u16, reason: &'static str) -> bool {
        self.sender
            .try_send(OutboundMessage::close(code, reason))
            .is_ok()
    }

    /// Ask the task that owns this connection to close it with `code`.
    pub fn request_close(&self, code: u16) {
        self.close_code.store(code, Ordering::Release);
        self.close_signal.notify_one();
    }

    /// Resolves once `request_close` has been called; yields the requested code.
    pub async fn close_requested(&self) -> u16 {
        self.close_signal.notified().await;
        self.close_code.load(Ordering::Acquire)
    }
}
