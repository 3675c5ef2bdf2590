//! Remedial action dispatch.
//!
//! Every assertion produces exactly one transition request. Failures are
//! reported and counted, never retried or re-queued.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::TransitionRequest;
use crate::error::ActionError;
use crate::transport::StateController;

use super::envelope::AssertionEvent;

/// Snapshot of dispatcher counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub issued: u64,
    pub failed: u64,
}

/// Issues the configured transition request for each assertion.
#[derive(Debug)]
pub struct ActionDispatcher<C> {
    controller: C,
    request: TransitionRequest,
    issued: AtomicU64,
    failed: AtomicU64,
}

impl<C: StateController> ActionDispatcher<C> {
    pub fn new(controller: C, request: TransitionRequest) -> Self {
        Self {
            controller,
            request,
            issued: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Send one transition request for `assertion`.
    ///
    /// There is no memory of earlier assertions: a property that re-asserts
    /// triggers a new request every time.
    pub fn dispatch(&self, assertion: &AssertionEvent) -> Result<(), ActionError> {
        info!(
            sensor = %assertion.entity_identifier,
            property = %assertion.property_name,
            "Sensor {} asserted {}!",
            assertion.entity_identifier,
            assertion.property_name
        );

        self.issued.fetch_add(1, Ordering::Relaxed);
        match self.controller.request_transition(&self.request) {
            Ok(()) => {
                info!(
                    target_path = %self.request.object_path,
                    property = %self.request.property,
                    value = %self.request.value,
                    "requested state transition"
                );
                Ok(())
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, sensor = %assertion.entity_identifier, "failed to trigger host transition");
                Err(err)
            }
        }
    }

    /// The request sent for every assertion.
    #[must_use]
    pub fn request(&self) -> &TransitionRequest {
        &self.request
    }

    #[must_use]
    pub fn controller(&self) -> &C {
        &self.controller
    }

    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            issued: self.issued.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::RecordingController;
    use tracing_test::traced_test;

    const TEMP1: &str = "/xyz/openbmc_project/sensors/temperature/Temp1";

    #[test]
    fn dispatch_sends_configured_request() {
        let dispatcher = ActionDispatcher::new(RecordingController::new(), TransitionRequest::chassis_power_off());
        dispatcher
            .dispatch(&AssertionEvent::new(TEMP1, "CriticalAlarmHigh"))
            .unwrap();

        let sent = dispatcher.controller().requests();
        assert_eq!(sent, vec![dispatcher.request().clone()]);
        assert_eq!(dispatcher.request(), &TransitionRequest::chassis_power_off());
        assert_eq!(dispatcher.stats(), DispatchStats { issued: 1, failed: 0 });
    }

    #[test]
    fn repeated_assertions_are_not_debounced() {
        let dispatcher = ActionDispatcher::new(RecordingController::new(), TransitionRequest::default());
        let event = AssertionEvent::new(TEMP1, "CriticalAlarmLow");
        dispatcher.dispatch(&event).unwrap();
        dispatcher.dispatch(&event).unwrap();
        assert_eq!(dispatcher.controller().requests().len(), 2);
    }

    #[traced_test]
    #[test]
    fn rejection_is_reported_not_retried() {
        let controller = RecordingController::new();
        controller.reject_with(ActionError::Rejected {
            name: "org.freedesktop.DBus.Error.AccessDenied".to_string(),
            message: "denied".to_string(),
        });
        let dispatcher = ActionDispatcher::new(controller, TransitionRequest::default());

        let err = dispatcher
            .dispatch(&AssertionEvent::new(TEMP1, "CriticalAlarmHigh"))
            .unwrap_err();
        assert!(matches!(err, ActionError::Rejected { .. }));
        assert_eq!(dispatcher.controller().attempts(), 1);
        assert_eq!(dispatcher.stats(), DispatchStats { issued: 1, failed: 1 });

        assert!(logs_contain("asserted CriticalAlarmHigh!"));
        assert!(logs_contain("failed to trigger host transition"));
    }
}
