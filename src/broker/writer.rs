//! Direct write buffer for bypassing channel overhead.
//!
//! The router writes serialized packets directly into a per-connection
//! buffer, eliminating mpsc channel overhead for fan-out.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::codec::Encoder;
use crate::protocol::Packet;

/// Error when sending to a `SessionWriter`.
#[derive(Debug)]
pub enum SendError {
    /// Connection is closed.
    Closed,
    /// Encoding error.
    EncodingError,
}

/// Shared write buffer for direct writes from the router to a connection.
///
/// The router appends serialized bytes to the buffer and notifies the
/// connection's read loop, which flushes the buffer to the socket.
pub struct SessionWriter {
    buffer: Mutex<BytesMut>,
    encoder: Mutex<Encoder>,
    notify: Notify,
    alive: AtomicBool,
    max_packet_size: usize,
}

impl SessionWriter {
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buffer: Mutex::new(BytesMut::with_capacity(2048)),
            encoder: Mutex::new(Encoder::new()),
            notify: Notify::new(),
            alive: AtomicBool::new(true),
            max_packet_size,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the connection as closed and wake the read loop so it notices.
    pub fn close(&self) {
        self.alive.store(false, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    /// Take all pending bytes from the buffer for a socket write.
    pub fn take_buffer(&self) -> BytesMut {
        self.buffer.lock().split()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Encode `packet` into the buffer and wake the read loop if the
    /// buffer was empty. Oversized packets are silently dropped, matching
    /// what a client would see if the socket connection dropped a frame.
    pub fn send_packet(&self, packet: &Packet) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Closed);
        }

        let was_empty = {
            let mut buffer = self.buffer.lock();
            let encoder = self.encoder.lock();

            let start_len = buffer.len();
            if encoder.encode(packet, &mut buffer).is_err() {
                buffer.truncate(start_len);
                return Err(SendError::EncodingError);
            }

            let packet_len = buffer.len() - start_len;
            if packet_len > self.max_packet_size {
                buffer.truncate(start_len);
                return Ok(());
            }
            start_len == 0
        };

        if was_empty {
            self.notify.notify_one();
        }
        Ok(())
    }
}

impl std::fmt::Debug for SessionWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWriter")
            .field("buffer_len", &self.buffer_len())
            .field("alive", &self.is_alive())
            .finish()
    }
}
