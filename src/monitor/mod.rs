//! The monitor core: registry, classification, dispatch and the receive loop.
//!
//! Envelopes are handled one at a time on the thread driving the
//! subscription. The registry is the only shared state and is read-only.

/// Action dispatch to the state controller.
pub mod dispatcher;
/// Envelope classification.
pub mod classifier;
/// Change envelope traits and assertion events.
pub mod envelope;
/// Per-envelope handler combining classifier and dispatcher.
pub mod pipeline;
/// Watched sensors and threshold kinds.
pub mod registry;
/// Match filters, subscription handles and the receive loop.
pub mod subscription;

pub use classifier::EventClassifier;
pub use dispatcher::{ActionDispatcher, DispatchStats};
pub use envelope::{AssertionEvent, ChangeEnvelope, ChangedProperties, MemoryEnvelope};
pub use pipeline::{MonitorPipeline, Outcome, PipelineStats};
pub use registry::{Threshold, WatchRegistry, WatchedEntity};
pub use subscription::{run, SignalFilter, Subscription, SubscriptionId};
