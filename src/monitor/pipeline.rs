//! Classify-then-dispatch pipeline run for every envelope.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::error::{ActionError, EnvelopeError};
use crate::transport::StateController;

use super::classifier::EventClassifier;
use super::dispatcher::ActionDispatcher;
use super::envelope::{AssertionEvent, ChangeEnvelope};

/// What happened to one envelope.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No watched property asserted.
    Ignored,
    /// An assertion was found and the action request was accepted.
    Dispatched(AssertionEvent),
    /// An assertion was found but the state controller failed.
    ActionFailed {
        assertion: AssertionEvent,
        error: ActionError,
    },
    /// The envelope could not be decoded.
    Malformed(EnvelopeError),
}

/// Snapshot of pipeline counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub envelopes: u64,
    pub malformed: u64,
    pub assertions: u64,
    pub actions_issued: u64,
    pub action_failures: u64,
}

/// The envelope handler registered with a subscription.
///
/// Errors from one envelope are contained here and never reach the receive loop.
#[derive(Debug)]
pub struct MonitorPipeline<C> {
    classifier: EventClassifier,
    dispatcher: ActionDispatcher<C>,
    envelopes: AtomicU64,
    malformed: AtomicU64,
    assertions: AtomicU64,
}

impl<C: StateController> MonitorPipeline<C> {
    /// Combine a classifier and a dispatcher.
    pub fn new(classifier: EventClassifier, dispatcher: ActionDispatcher<C>) -> Self {
        Self {
            classifier,
            dispatcher,
            envelopes: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            assertions: AtomicU64::new(0),
        }
    }

    /// Build the pipeline described by `config` around `controller`.
    pub fn from_config(config: &MonitorConfig, controller: C) -> Self {
        let classifier = EventClassifier::new(
            config.watched_interface.clone(),
            Arc::new(config.registry.clone()),
        );
        let dispatcher = ActionDispatcher::new(controller, config.action.clone());
        Self::new(classifier, dispatcher)
    }

    /// Classify one envelope and, on assertion, dispatch the action once.
    pub fn handle<E>(&self, envelope: &E) -> Outcome
    where
        E: ChangeEnvelope + ?Sized,
    {
        self.envelopes.fetch_add(1, Ordering::Relaxed);

        let assertion = match self.classifier.classify(envelope) {
            Ok(Some(assertion)) => assertion,
            Ok(None) => return Outcome::Ignored,
            Err(err) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    error = %err,
                    path = envelope.entity_identifier().unwrap_or("<none>"),
                    "discarding malformed envelope"
                );
                return Outcome::Malformed(err);
            }
        };

        self.assertions.fetch_add(1, Ordering::Relaxed);
        match self.dispatcher.dispatch(&assertion) {
            Ok(()) => Outcome::Dispatched(assertion),
            Err(error) => {
                debug!(sensor = %assertion.entity_identifier, "continuing after action failure");
                Outcome::ActionFailed { assertion, error }
            }
        }
    }

    #[must_use]
    pub fn classifier(&self) -> &EventClassifier {
        &self.classifier
    }

    #[must_use]
    pub fn dispatcher(&self) -> &ActionDispatcher<C> {
        &self.dispatcher
    }

    /// Counters since construction.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        let dispatch = self.dispatcher.stats();
        PipelineStats {
            envelopes: self.envelopes.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            assertions: self.assertions.load(Ordering::Relaxed),
            actions_issued: dispatch.issued,
            action_failures: dispatch.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CRITICAL_THRESHOLD_INTERFACE;
    use crate::monitor::envelope::MemoryEnvelope;
    use crate::transport::memory::RecordingController;
    use crate::value::PropertyValue;
    use tracing_test::traced_test;

    const TEMP1: &str = "/xyz/openbmc_project/sensors/temperature/Temp1";

    fn pipeline() -> MonitorPipeline<RecordingController> {
        MonitorPipeline::from_config(&MonitorConfig::default(), RecordingController::new())
    }

    fn asserting() -> MemoryEnvelope {
        MemoryEnvelope::new(CRITICAL_THRESHOLD_INTERFACE, TEMP1).with_property("CriticalAlarmHigh", true)
    }

    #[test]
    fn assertion_dispatches_once() {
        let p = pipeline();
        let outcome = p.handle(&asserting());
        let Outcome::Dispatched(event) = outcome else {
            panic!("expected dispatch, got {outcome:?}");
        };
        assert_eq!(event.property_name, "CriticalAlarmHigh");
        assert_eq!(p.dispatcher().controller().attempts(), 1);
    }

    #[traced_test]
    #[test]
    fn malformed_envelope_is_contained() {
        let p = pipeline();
        let bad = MemoryEnvelope::new(CRITICAL_THRESHOLD_INTERFACE, TEMP1)
            .with_property("CriticalAlarmHigh", PropertyValue::String("yes".to_string()));

        assert!(matches!(p.handle(&bad), Outcome::Malformed(_)));
        assert!(matches!(p.handle(&asserting()), Outcome::Dispatched(_)));

        let stats = p.stats();
        assert_eq!(stats.envelopes, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.assertions, 1);
        assert!(logs_contain("discarding malformed envelope"));
    }

    #[test]
    fn action_failure_is_contained() {
        let p = pipeline();
        p.dispatcher().controller().reject_with(ActionError::Unreachable {
            message: "chassis manager not running".to_string(),
        });

        let outcome = p.handle(&asserting());
        assert!(matches!(outcome, Outcome::ActionFailed { .. }));

        p.dispatcher().controller().accept();
        assert!(matches!(p.handle(&asserting()), Outcome::Dispatched(_)));

        let stats = p.stats();
        assert_eq!(stats.actions_issued, 2);
        assert_eq!(stats.action_failures, 1);
    }
}
