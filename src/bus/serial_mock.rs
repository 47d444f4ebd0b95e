//! Mock bus implementations for testing
//!
//! [`MockSerialPort`] is a byte pipe implementing tokio's async I/O traits,
//! for exercising [`StreamTransport`](crate::bus::transport::StreamTransport).
//!
//! [`SimulatedBus`] sits one level higher: it implements
//! [`Connector`] and [`Transport`] and answers each request with replies
//! scripted per device address and command, so the retry controller and the
//! scan scheduler can be driven without hardware.

use crate::bus::frame::encode_response;
use crate::constants::{ACK, ADDRESS_MARKER, NAK};
use crate::error::BusError;
use crate::bus::transport::{Connector, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Mock serial port that simulates bidirectional communication
#[derive(Clone, Default)]
pub struct MockSerialPort {
    /// Data written to the port (outgoing)
    pub tx_buffer: Arc<Mutex<Vec<u8>>>,
    /// Data to be read from the port (incoming)
    pub rx_buffer: Arc<Mutex<VecDeque<u8>>>,
    /// Simulated errors
    pub next_error: Arc<Mutex<Option<io::Error>>>,
    /// When set, reads on an empty buffer never complete
    pub silent: Arc<Mutex<bool>>,
}

impl MockSerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue data to be read from the port
    pub fn queue_rx_data(&self, data: &[u8]) {
        self.rx_buffer.lock().unwrap().extend(data);
    }

    /// Get data that was written to the port
    pub fn get_tx_data(&self) -> Vec<u8> {
        self.tx_buffer.lock().unwrap().clone()
    }

    /// Set an error to be returned on the next operation
    pub fn set_next_error(&self, error: io::Error) {
        *self.next_error.lock().unwrap() = Some(error);
    }

    pub fn set_silent(&self, silent: bool) {
        *self.silent.lock().unwrap() = silent;
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(error) = self.next_error.lock().unwrap().take() {
            return Poll::Ready(Err(error));
        }

        let mut rx = self.rx_buffer.lock().unwrap();
        if rx.is_empty() && *self.silent.lock().unwrap() {
            return Poll::Pending;
        }

        let available = rx.len().min(buf.remaining());
        if available > 0 {
            let data: Vec<u8> = rx.drain(..available).collect();
            buf.put_slice(&data);
        }

        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(error) = self.next_error.lock().unwrap().take() {
            return Poll::Ready(Err(error));
        }

        self.tx_buffer.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// What a simulated device puts on the line after a request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Raw bytes, sent as-is
    Frame(Bytes),
    /// Nothing; the receive times out
    Silence,
}

impl Reply {
    /// A well-formed response with the given status byte.
    pub fn status(status: u8, payload: &str) -> Self {
        match encode_response(status, payload) {
            Ok(frame) => Reply::Frame(frame),
            Err(_) => Reply::Silence,
        }
    }

    pub fn ack(payload: &str) -> Self {
        Reply::status(ACK, payload)
    }

    pub fn nak() -> Self {
        Reply::status(NAK, "")
    }

    /// A well-formed response whose BCC has been damaged.
    pub fn corrupted(status: u8, payload: &str) -> Self {
        match Reply::status(status, payload) {
            Reply::Frame(frame) => {
                let mut raw = frame.to_vec();
                if let Some(bcc) = raw.last_mut() {
                    *bcc ^= 0x5A;
                }
                Reply::Frame(Bytes::from(raw))
            }
            silence => silence,
        }
    }
}

#[derive(Default)]
struct BusState {
    scripts: HashMap<(u8, String), VecDeque<Reply>>,
    fallback: HashMap<(u8, String), Reply>,
    pending: Option<Reply>,
    stale: VecDeque<Bytes>,
    requests: Vec<(u8, String)>,
    opens: usize,
    closes: usize,
    open_failures: usize,
}

/// A bus of simulated devices; clones share the same state.
#[derive(Clone, Default)]
pub struct SimulatedBus {
    state: Arc<Mutex<BusState>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `replies` for `command` at `address`, consumed in order.
    pub fn script(&self, address: u8, command: &str, replies: impl IntoIterator<Item = Reply>) {
        let mut state = self.state.lock().unwrap();
        state
            .scripts
            .entry((address, command.to_string()))
            .or_default()
            .extend(replies);
    }

    /// Reply used once the script for `command` at `address` runs dry.
    pub fn always(&self, address: u8, command: &str, reply: Reply) {
        let mut state = self.state.lock().unwrap();
        state.fallback.insert((address, command.to_string()), reply);
    }

    /// Leaves bytes on the line to be picked up by the next unsolicited read.
    pub fn leave_stale(&self, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.stale.push_back(Bytes::copy_from_slice(data));
    }

    /// Makes the next `count` opens fail.
    pub fn fail_opens(&self, count: usize) {
        self.state.lock().unwrap().open_failures = count;
    }

    /// Every request seen so far, as `(address, command)`.
    pub fn requests(&self) -> Vec<(u8, String)> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

#[async_trait]
impl Connector for SimulatedBus {
    type Transport = SimulatedTransport;

    async fn open(&self, path: &str) -> Result<SimulatedTransport, BusError> {
        let mut state = self.state.lock().unwrap();
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(BusError::TransportOpen {
                path: path.to_string(),
                reason: "simulated open failure".to_string(),
            });
        }
        state.opens += 1;
        Ok(SimulatedTransport {
            bus: self.clone(),
            open: true,
        })
    }
}

/// Transport handed out by [`SimulatedBus`].
pub struct SimulatedTransport {
    bus: SimulatedBus,
    open: bool,
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), BusError> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed").into());
        }
        // ADR | payload | ETX | BCC
        if data.len() < 3 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "short frame").into());
        }
        let address = data[0] & !ADDRESS_MARKER;
        let command = String::from_utf8_lossy(&data[1..data.len() - 2]).into_owned();

        let mut state = self.bus.state.lock().unwrap();
        let key = (address, command);
        let scripted = state.scripts.get_mut(&key).and_then(VecDeque::pop_front);
        let reply = match scripted {
            Some(reply) => reply,
            None => state.fallback.get(&key).cloned().unwrap_or(Reply::Silence),
        };
        state.requests.push(key);
        state.pending = Some(reply);
        Ok(())
    }

    async fn receive(&mut self, _timeout: Duration) -> Result<Bytes, BusError> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed").into());
        }
        let mut state = self.bus.state.lock().unwrap();
        match state.pending.take() {
            Some(Reply::Frame(frame)) => Ok(frame),
            Some(Reply::Silence) => Err(BusError::Timeout),
            None => state.stale.pop_front().ok_or(BusError::Timeout),
        }
    }

    async fn close(&mut self) -> Result<(), BusError> {
        if self.open {
            self.open = false;
            self.bus.state.lock().unwrap().closes += 1;
        }
        Ok(())
    }
}
