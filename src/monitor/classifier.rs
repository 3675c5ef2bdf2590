//! Envelope classification.
//!
//! Decides whether one change envelope carries a critical threshold assertion.
//! Checks run cheapest first: interface, then entity, then the property scan.

use std::sync::Arc;

use tracing::trace;

use crate::error::EnvelopeError;

use super::envelope::{AssertionEvent, ChangeEnvelope, ChangedProperties};
use super::registry::WatchRegistry;

/// Classifies envelopes against a watched interface and a [`WatchRegistry`].
#[derive(Debug, Clone)]
pub struct EventClassifier {
    watched_interface: String,
    registry: Arc<WatchRegistry>,
}

impl EventClassifier {
    #[must_use]
    pub fn new(watched_interface: impl Into<String>, registry: Arc<WatchRegistry>) -> Self {
        Self {
            watched_interface: watched_interface.into(),
            registry,
        }
    }

    #[must_use]
    pub fn watched_interface(&self) -> &str {
        &self.watched_interface
    }

    /// Returns the first watched property holding `true`, if any.
    ///
    /// Unwatched properties are skipped without decoding. A watched property
    /// whose value is not a boolean aborts classification of this envelope.
    pub fn classify<E>(&self, envelope: &E) -> Result<Option<AssertionEvent>, EnvelopeError>
    where
        E: ChangeEnvelope + ?Sized,
    {
        let interface = envelope.interface_name()?;
        if interface != self.watched_interface.as_str() {
            trace!(interface = %interface, "ignoring envelope for unwatched interface");
            return Ok(None);
        }

        let Some(path) = envelope.entity_identifier() else {
            return Ok(None);
        };
        let Some(entity) = self.registry.lookup(path) else {
            trace!(path, "ignoring envelope from unmonitored entity");
            return Ok(None);
        };

        let mut properties = envelope.changed_properties()?;
        while let Some(name) = properties.next_name()? {
            if !self.registry.is_watched_property(entity, &name) {
                properties.skip_value()?;
                continue;
            }

            if properties.read_bool()? {
                return Ok(Some(AssertionEvent::new(path, name)));
            }
        }

        Ok(None)
    }
}
