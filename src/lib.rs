//! # threshold-monitor
//!
//! Watches sensor critical threshold alarms on a message bus and requests a
//! host state transition when one asserts.
//!
//! ## Core Concepts
//!
//! - **Envelope**: one `PropertiesChanged` notification from a sensor
//! - **Watch registry**: which sensors are monitored, and for which alarms
//! - **Assertion**: a watched alarm property observed `true`
//! - **Dispatch**: exactly one transition request per assertion, never retried
//!
//! ## Usage
//!
//! ```rust
//! use threshold_monitor::config::{MonitorConfig, CRITICAL_THRESHOLD_INTERFACE};
//! use threshold_monitor::monitor::{MemoryEnvelope, MonitorPipeline, Outcome};
//! use threshold_monitor::transport::memory::RecordingController;
//!
//! let pipeline = MonitorPipeline::from_config(&MonitorConfig::default(), RecordingController::new());
//!
//! let envelope = MemoryEnvelope::new(
//!     CRITICAL_THRESHOLD_INTERFACE,
//!     "/xyz/openbmc_project/sensors/temperature/Temp1",
//! )
//! .with_property("CriticalAlarmHigh", true);
//!
//! assert!(matches!(pipeline.handle(&envelope), Outcome::Dispatched(_)));
//! assert_eq!(pipeline.dispatcher().controller().requests().len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod monitor;
pub mod transport;
pub mod value;

// Re-export primary types at crate root for convenience
pub use config::{BusKind, MonitorConfig, TransitionRequest};
pub use error::{
    ActionError, ConfigError, EnvelopeError, MonitorError, MonitorResult, TransportError,
};
pub use monitor::{
    AssertionEvent, ChangeEnvelope, EventClassifier, MonitorPipeline, Outcome, WatchRegistry,
    WatchedEntity,
};
pub use transport::{NotificationTransport, StateController};
pub use value::PropertyValue;
