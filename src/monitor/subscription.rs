use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{PROPERTIES_CHANGED_MEMBER, PROPERTIES_INTERFACE};
use crate::error::{MonitorError, TransportError};
use crate::transport::{NotificationTransport, StateController};

use super::pipeline::MonitorPipeline;

/// Unique identifier for a registered match.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bus-side selection of signals, as in a D-Bus match rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalFilter {
    /// Interface the signal is emitted on.
    pub interface: String,
    /// Signal name.
    pub member: String,
    /// Required value of the first string argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg0: Option<String>,
}

impl SignalFilter {
    /// `PropertiesChanged` signals for one changed interface.
    #[must_use]
    pub fn properties_changed(interface: impl Into<String>) -> Self {
        Self {
            interface: PROPERTIES_INTERFACE.to_string(),
            member: PROPERTIES_CHANGED_MEMBER.to_string(),
            arg0: Some(interface.into()),
        }
    }

    /// Whether a signal with these header fields passes the filter.
    #[must_use]
    pub fn matches(&self, interface: &str, member: &str, arg0: Option<&str>) -> bool {
        if self.interface != interface || self.member != member {
            return false;
        }
        match &self.arg0 {
            Some(expected) => arg0 == Some(expected.as_str()),
            None => true,
        }
    }

    /// Render as a D-Bus match rule string.
    #[must_use]
    pub fn match_rule(&self) -> String {
        let mut rule = format!(
            "type='signal',interface='{}',member='{}'",
            self.interface, self.member
        );
        if let Some(arg0) = &self.arg0 {
            rule.push_str(&format!(",arg0='{arg0}'"));
        }
        rule
    }
}

/// A registered match on a transport.
///
/// Dropping the subscription removes the match.
pub struct Subscription<'t, T: NotificationTransport> {
    transport: &'t mut T,
    id: SubscriptionId,
}

impl<'t, T: NotificationTransport> Subscription<'t, T> {
    /// Register `filter` on `transport`.
    pub fn new(transport: &'t mut T, filter: &SignalFilter) -> Result<Self, TransportError> {
        let id = transport.add_match(filter)?;
        debug!(%id, rule = %filter.match_rule(), "match registered");
        Ok(Self { transport, id })
    }

    /// Receive the next matching envelope (blocking).
    pub fn recv(&mut self) -> Result<T::Envelope, TransportError> {
        self.transport.next_envelope()
    }

    /// Hand every envelope to `handler`, one at a time, until the transport fails.
    ///
    /// Never returns on success; the returned error is always fatal.
    pub fn run<F>(&mut self, mut handler: F) -> TransportError
    where
        F: FnMut(&T::Envelope),
    {
        loop {
            match self.recv() {
                Ok(envelope) => handler(&envelope),
                Err(err) => return err,
            }
        }
    }
}

impl<T: NotificationTransport> Drop for Subscription<'_, T> {
    fn drop(&mut self) {
        self.transport.remove_match(self.id);
        debug!(id = %self.id, "match removed");
    }
}

/// Subscribe the pipeline to its watched interface and process envelopes until
/// the transport fails.
///
/// The returned error is left for the caller to report; only the final counters
/// are logged here.
pub fn run<T, C>(transport: &mut T, pipeline: &MonitorPipeline<C>) -> MonitorError
where
    T: NotificationTransport,
    C: StateController,
{
    let filter = SignalFilter::properties_changed(pipeline.classifier().watched_interface());
    let mut subscription = match Subscription::new(transport, &filter) {
        Ok(subscription) => subscription,
        Err(err) => return MonitorError::Subscription(err),
    };

    let err = subscription.run(|envelope| {
        pipeline.handle(envelope);
    });

    let stats = pipeline.stats();
    info!(
        envelopes = stats.envelopes,
        assertions = stats.assertions,
        action_failures = stats.action_failures,
        malformed = stats.malformed,
        "receive loop stopped"
    );
    MonitorError::TransportProcess(err)
}
