//! In-process transport and state controllers.
//!
//! `memory_bus` returns a publisher/transport pair joined by a bounded
//! channel. The transport applies registered match filters the way a bus
//! daemon would, so only matching envelopes reach the receive loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{info, trace};

use crate::config::{TransitionRequest, PROPERTIES_CHANGED_MEMBER, PROPERTIES_INTERFACE};
use crate::error::{ActionError, TransportError};
use crate::monitor::envelope::MemoryEnvelope;
use crate::monitor::subscription::{SignalFilter, SubscriptionId};

use super::{NotificationTransport, StateController};

#[derive(Debug)]
enum Frame {
    Envelope(MemoryEnvelope),
    Fault(String),
}

/// Create a connected publisher/transport pair.
///
/// `capacity` bounds the number of undelivered frames; `publish` blocks when
/// the queue is full.
#[must_use]
pub fn memory_bus(capacity: usize) -> (MemoryPublisher, MemoryTransport) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        MemoryPublisher { tx },
        MemoryTransport {
            rx,
            filters: HashMap::new(),
            unmatched: 0,
        },
    )
}

/// Sending side of an in-process bus.
#[derive(Debug, Clone)]
pub struct MemoryPublisher {
    tx: Sender<Frame>,
}

impl MemoryPublisher {
    /// Emit a `PropertiesChanged` signal carrying `envelope`.
    pub fn publish(&self, envelope: MemoryEnvelope) -> Result<(), TransportError> {
        self.tx
            .send(Frame::Envelope(envelope))
            .map_err(|_| TransportError::Closed)
    }

    /// Make the transport's next receive fail with a processing error.
    pub fn fail(&self, message: impl Into<String>) -> Result<(), TransportError> {
        self.tx
            .send(Frame::Fault(message.into()))
            .map_err(|_| TransportError::Closed)
    }
}

/// Receiving side of an in-process bus.
#[derive(Debug)]
pub struct MemoryTransport {
    rx: Receiver<Frame>,
    filters: HashMap<SubscriptionId, SignalFilter>,
    unmatched: u64,
}

impl MemoryTransport {
    /// Number of envelopes discarded because no filter matched them.
    #[must_use]
    pub const fn unmatched(&self) -> u64 {
        self.unmatched
    }

    /// Number of registered matches.
    #[must_use]
    pub fn match_count(&self) -> usize {
        self.filters.len()
    }

    fn is_wanted(&self, envelope: &MemoryEnvelope) -> bool {
        self.filters.values().any(|f| {
            f.matches(
                PROPERTIES_INTERFACE,
                PROPERTIES_CHANGED_MEMBER,
                Some(envelope.interface_name.as_str()),
            )
        })
    }
}

impl NotificationTransport for MemoryTransport {
    type Envelope = MemoryEnvelope;

    fn add_match(&mut self, filter: &SignalFilter) -> Result<SubscriptionId, TransportError> {
        let id = SubscriptionId::new();
        self.filters.insert(id, filter.clone());
        Ok(id)
    }

    fn remove_match(&mut self, id: SubscriptionId) {
        self.filters.remove(&id);
    }

    fn next_envelope(&mut self) -> Result<Self::Envelope, TransportError> {
        loop {
            match self.rx.recv() {
                Ok(Frame::Envelope(envelope)) => {
                    if self.is_wanted(&envelope) {
                        return Ok(envelope);
                    }
                    self.unmatched += 1;
                    trace!(interface = %envelope.interface_name, "no match for envelope");
                }
                Ok(Frame::Fault(message)) => return Err(TransportError::Process { message }),
                Err(_) => return Err(TransportError::Closed),
            }
        }
    }
}

/// State controller that records requests and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingController {
    accepted: Mutex<Vec<TransitionRequest>>,
    failure: Mutex<Option<ActionError>>,
    attempts: AtomicU64,
}

impl RecordingController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every following request with `error`.
    pub fn reject_with(&self, error: ActionError) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(error);
        }
    }

    /// Accept every following request.
    pub fn accept(&self) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = None;
        }
    }

    /// Requests that were accepted, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<TransitionRequest> {
        self.accepted.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Number of requests received, accepted or not.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl StateController for RecordingController {
    fn request_transition(&self, request: &TransitionRequest) -> Result<(), ActionError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let failure = self.failure.lock().ok().and_then(|f| f.clone());
        if let Some(error) = failure {
            return Err(error);
        }

        if let Ok(mut accepted) = self.accepted.lock() {
            accepted.push(request.clone());
        }
        Ok(())
    }
}

/// State controller that only logs what it would have sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunController;

impl StateController for DryRunController {
    fn request_transition(&self, request: &TransitionRequest) -> Result<(), ActionError> {
        info!(
            service = %request.service,
            target_path = %request.object_path,
            interface = %request.interface,
            property = %request.property,
            value = %request.value,
            "dry run: not sending transition request"
        );
        Ok(())
    }
}
