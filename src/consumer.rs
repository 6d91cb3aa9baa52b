//! Streaming consumer: capture records out to the network client.
//!
//! Best-effort: the consumer never stalls the producer. If the network is
//! slow the queue fills and the sampler drops the newest records; if the
//! client is gone records are dequeued and dropped.
//!
//! # Rules
//!
//! - One send attempt per record, no retry, no buffering
//! - The record is dropped after the attempt in every case
//! - A failed send unbinds the client
//! - Every write to the client goes through the send gate (`ClientLink`)

use alloc::vec::Vec;

use crate::config::SEND_GATE_TIMEOUT_US;
use crate::fault::{FaultCode, FaultState};
use crate::hal::Clock;
use crate::queue::CaptureQueue;
use crate::record::CaptureRecord;
use crate::sync::{Notify, TimedLock};

/// Network send error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// No client is bound.
    NoClient,
    /// Send gate not acquired within `SEND_GATE_TIMEOUT_US`.
    Busy,
    /// Peer closed the connection.
    Closed,
    /// Transport error code.
    Io(i32),
}

impl core::fmt::Display for SendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoClient => write!(f, "no client bound"),
            Self::Busy => write!(f, "send gate busy"),
            Self::Closed => write!(f, "connection closed"),
            Self::Io(code) => write!(f, "transport error {}", code),
        }
    }
}

/// One connected streaming client.
pub trait FrameSink {
    /// Send one binary frame.
    fn send_binary(&mut self, frame: &[u8]) -> Result<(), SendError>;

    /// Send one text frame.
    fn send_text(&mut self, text: &str) -> Result<(), SendError>;
}

/// The single bound client behind the send gate.
///
/// Binding, unbinding and sending all take the same timeout-bounded lock, so
/// the data path and the metadata path never interleave on the wire.
pub struct ClientLink<S> {
    client: TimedLock<Option<S>>,
}

impl<S: FrameSink + Send> ClientLink<S> {
    pub const fn new() -> Self {
        Self {
            client: TimedLock::new(None),
        }
    }

    /// Bind `sink` as the streaming client, replacing any previous one.
    pub fn bind<C: Clock + ?Sized>(&self, sink: S, clock: &C) -> Result<(), SendError> {
        let mut slot = self
            .client
            .lock_timeout(clock, SEND_GATE_TIMEOUT_US)
            .ok_or(SendError::Busy)?;
        *slot = Some(sink);
        Ok(())
    }

    /// Bind `sink` and immediately send it `greeting` (the metadata frame)
    /// under the same gate acquisition.
    pub fn bind_with_greeting<C: Clock + ?Sized>(
        &self,
        mut sink: S,
        greeting: &str,
        clock: &C,
    ) -> Result<(), SendError> {
        let mut slot = self
            .client
            .lock_timeout(clock, SEND_GATE_TIMEOUT_US)
            .ok_or(SendError::Busy)?;
        sink.send_text(greeting)?;
        *slot = Some(sink);
        Ok(())
    }

    pub fn unbind<C: Clock + ?Sized>(&self, clock: &C) -> Result<(), SendError> {
        let mut slot = self
            .client
            .lock_timeout(clock, SEND_GATE_TIMEOUT_US)
            .ok_or(SendError::Busy)?;
        *slot = None;
        Ok(())
    }

    /// Best-effort check; the answer may be stale by the time it is used.
    pub fn is_bound(&self) -> bool {
        self.client.try_lock().map(|slot| slot.is_some()).unwrap_or(true)
    }

    fn with_client<C, F>(&self, clock: &C, send: F) -> Result<(), SendError>
    where
        C: Clock + ?Sized,
        F: FnOnce(&mut S) -> Result<(), SendError>,
    {
        let mut slot = self
            .client
            .lock_timeout(clock, SEND_GATE_TIMEOUT_US)
            .ok_or(SendError::Busy)?;
        let sink = slot.as_mut().ok_or(SendError::NoClient)?;
        let result = send(sink);
        if result.is_err() {
            *slot = None;
        }
        result
    }

    /// Send a binary frame to the bound client. Unbinds on failure.
    pub fn send_frame<C: Clock + ?Sized>(&self, frame: &[u8], clock: &C) -> Result<(), SendError> {
        self.with_client(clock, |sink| sink.send_binary(frame))
    }

    /// Send a text frame (metadata) to the bound client. Unbinds on failure.
    pub fn send_text<C: Clock + ?Sized>(&self, text: &str, clock: &C) -> Result<(), SendError> {
        self.with_client(clock, |sink| sink.send_text(text))
    }
}

impl<S: FrameSink + Send> Default for ClientLink<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one dequeued record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// No client bound; record discarded.
    NoClient,
    /// Send failed; client unbound, record discarded.
    Failed(SendError),
}

/// Consumer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub sent: u32,
    pub discarded: u32,
    pub failed: u32,
}

impl ConsumerStats {
    /// Count one delivery. Counters wrap.
    pub fn record(&mut self, delivery: Delivery) {
        let counter = match delivery {
            Delivery::Sent => &mut self.sent,
            Delivery::NoClient | Delivery::Failed(SendError::Busy) => &mut self.discarded,
            Delivery::Failed(_) => &mut self.failed,
        };
        *counter = counter.wrapping_add(1);
    }
}

/// Drains the capture queue into the client link.
///
/// ```ignore
/// let mut consumer = StreamingConsumer::new(&queue, &link, &clock, &faults);
/// consumer.run(); // never returns
/// ```
pub struct StreamingConsumer<'a, S, Q, C: ?Sized> {
    queue: &'a CaptureQueue<Q>,
    link: &'a ClientLink<S>,
    clock: &'a C,
    faults: &'a FaultState,
    /// Reused encode buffer.
    frame: Vec<u8>,
    stats: ConsumerStats,
}

impl<'a, S, Q, C> StreamingConsumer<'a, S, Q, C>
where
    S: FrameSink + Send,
    Q: Notify,
    C: Clock + ?Sized,
{
    pub fn new(
        queue: &'a CaptureQueue<Q>,
        link: &'a ClientLink<S>,
        clock: &'a C,
        faults: &'a FaultState,
    ) -> Self {
        Self {
            queue,
            link,
            clock,
            faults,
            frame: Vec::new(),
            stats: ConsumerStats::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Consumer task body. Never returns.
    pub fn run(&mut self) -> ! {
        loop {
            self.run_once(None);
        }
    }

    /// Wait for one record (up to `timeout_us`, `None` = forever) and deliver it.
    ///
    /// Returns `None` only on timeout.
    pub fn run_once(&mut self, timeout_us: Option<u64>) -> Option<Delivery> {
        let record = self.queue.dequeue(timeout_us)?;
        Some(self.deliver(record))
    }

    /// Encode and send one record. The record is dropped on return.
    pub fn deliver(&mut self, record: CaptureRecord) -> Delivery {
        let delivery = self.send(record);
        self.stats.record(delivery);
        delivery
    }

    fn send(&mut self, record: CaptureRecord) -> Delivery {
        if !self.link.is_bound() {
            return Delivery::NoClient;
        }

        record.encode_into(&mut self.frame);
        drop(record);

        match self.link.send_frame(&self.frame, self.clock) {
            Ok(()) => Delivery::Sent,
            Err(SendError::NoClient) => Delivery::NoClient,
            Err(SendError::Busy) => {
                // Gate held by the metadata path; the client stays bound.
                log::debug!("send gate busy, record discarded");
                Delivery::Failed(SendError::Busy)
            }
            Err(e) => {
                self.faults.set(FaultCode::SendFailed, 0);
                log::warn!("stream send failed ({}), client unbound", e);
                Delivery::Failed(e)
            }
        }
    }
}
