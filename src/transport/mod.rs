//! Collaborator interfaces: the notification bus and the state controller.
//!
//! The monitor core only consumes these traits. `memory` provides an
//! in-process implementation; `dbus` (feature `transport-dbus`) talks to a real
//! system or session bus.

use std::sync::Arc;

use crate::config::TransitionRequest;
use crate::error::{ActionError, TransportError};
use crate::monitor::envelope::ChangeEnvelope;
use crate::monitor::subscription::{SignalFilter, SubscriptionId};

#[cfg(feature = "transport-dbus")]
pub mod dbus;
pub mod memory;

/// A bus that delivers change envelopes matching registered filters.
pub trait NotificationTransport {
    /// Envelope type produced by this transport.
    type Envelope: ChangeEnvelope;

    /// Register a match filter with the bus.
    fn add_match(&mut self, filter: &SignalFilter) -> Result<SubscriptionId, TransportError>;

    /// Remove a previously registered match. Unknown ids are ignored.
    fn remove_match(&mut self, id: SubscriptionId);

    /// Block until the next matching envelope arrives.
    ///
    /// Any error returned here is unrecoverable for this transport.
    fn next_envelope(&mut self) -> Result<Self::Envelope, TransportError>;
}

/// Remote service that performs state transitions.
pub trait StateController {
    /// Send one transition request and wait for it to be accepted or rejected.
    fn request_transition(&self, request: &TransitionRequest) -> Result<(), ActionError>;
}

impl<C: StateController + ?Sized> StateController for &C {
    fn request_transition(&self, request: &TransitionRequest) -> Result<(), ActionError> {
        (**self).request_transition(request)
    }
}

impl<C: StateController + ?Sized> StateController for Box<C> {
    fn request_transition(&self, request: &TransitionRequest) -> Result<(), ActionError> {
        (**self).request_transition(request)
    }
}

impl<C: StateController + ?Sized> StateController for Arc<C> {
    fn request_transition(&self, request: &TransitionRequest) -> Result<(), ActionError> {
        (**self).request_transition(request)
    }
}
