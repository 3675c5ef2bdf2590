//! Change envelopes and assertion events.
//!
//! An envelope is one incoming `PropertiesChanged` notification. Its changed
//! properties are exposed as a cursor so a transport can decode values lazily:
//! the classifier only decodes values of watched properties and skips the rest
//! without looking at their type.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;
use crate::value::PropertyValue;

/// Cursor over the `(name, variant)` entries of a changed-properties container.
///
/// After `next_name` returns `Some`, exactly one of `read_bool` or
/// `skip_value` should be called for that entry before advancing again.
pub trait ChangedProperties {
    /// Enter the next entry and read its property name. `None` at the end.
    fn next_name(&mut self) -> Result<Option<String>, EnvelopeError>;

    /// Decode the current entry's value as a boolean.
    fn read_bool(&mut self) -> Result<bool, EnvelopeError>;

    /// Consume the current entry's value without inspecting its type.
    fn skip_value(&mut self) -> Result<(), EnvelopeError>;
}

/// One incoming change notification.
pub trait ChangeEnvelope {
    /// Cursor type over the changed properties.
    type Properties<'a>: ChangedProperties
    where
        Self: 'a;

    /// The interface whose properties changed.
    fn interface_name(&self) -> Result<Cow<'_, str>, EnvelopeError>;

    /// The entity (object path) that emitted the notification.
    fn entity_identifier(&self) -> Option<&str>;

    /// Open the changed-properties container.
    fn changed_properties(&self) -> Result<Self::Properties<'_>, EnvelopeError>;
}

/// A watched property observed to hold `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionEvent {
    /// Entity that asserted.
    pub entity_identifier: String,
    /// The asserted property.
    pub property_name: String,
    /// When the assertion was classified.
    pub observed_at: DateTime<Utc>,
}

impl AssertionEvent {
    /// Event observed now.
    #[must_use]
    pub fn new(entity_identifier: impl Into<String>, property_name: impl Into<String>) -> Self {
        Self {
            entity_identifier: entity_identifier.into(),
            property_name: property_name.into(),
            observed_at: Utc::now(),
        }
    }
}

/// An envelope held entirely in memory.
///
/// Used by the in-process transport and in tests. `truncate_after` models a
/// container that ends early: once that many entries have been read, the next
/// read fails with [`EnvelopeError::Truncated`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEnvelope {
    pub interface_name: String,
    pub entity_identifier: Option<String>,
    pub properties: Vec<(String, PropertyValue)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate_after: Option<usize>,
}

impl MemoryEnvelope {
    /// Envelope for `interface_name` emitted by `entity_identifier`.
    #[must_use]
    pub fn new(interface_name: impl Into<String>, entity_identifier: impl Into<String>) -> Self {
        Self {
            interface_name: interface_name.into(),
            entity_identifier: Some(entity_identifier.into()),
            properties: Vec::new(),
            truncate_after: None,
        }
    }

    /// Append a changed property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    /// Cut the container after `entries` complete entries.
    #[must_use]
    pub fn truncated_after(mut self, entries: usize) -> Self {
        self.truncate_after = Some(entries);
        self
    }
}

impl ChangeEnvelope for MemoryEnvelope {
    type Properties<'a> = MemoryProperties<'a>;

    fn interface_name(&self) -> Result<Cow<'_, str>, EnvelopeError> {
        Ok(Cow::Borrowed(&self.interface_name))
    }

    fn entity_identifier(&self) -> Option<&str> {
        self.entity_identifier.as_deref()
    }

    fn changed_properties(&self) -> Result<Self::Properties<'_>, EnvelopeError> {
        Ok(MemoryProperties {
            entries: &self.properties,
            limit: self.truncate_after,
            next: 0,
            current: None,
        })
    }
}

/// Cursor over a [`MemoryEnvelope`]'s properties.
#[derive(Debug)]
pub struct MemoryProperties<'a> {
    entries: &'a [(String, PropertyValue)],
    limit: Option<usize>,
    next: usize,
    current: Option<&'a PropertyValue>,
}

impl ChangedProperties for MemoryProperties<'_> {
    fn next_name(&mut self) -> Result<Option<String>, EnvelopeError> {
        self.current = None;
        if self.limit.is_some_and(|limit| self.next >= limit) {
            return Err(EnvelopeError::Truncated { position: self.next });
        }
        let Some((name, value)) = self.entries.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        self.current = Some(value);
        Ok(Some(name.clone()))
    }

    fn read_bool(&mut self) -> Result<bool, EnvelopeError> {
        self.current
            .take()
            .ok_or(EnvelopeError::NoCurrentEntry)?
            .decode_bool()
    }

    fn skip_value(&mut self) -> Result<(), EnvelopeError> {
        self.current
            .take()
            .map(|_| ())
            .ok_or(EnvelopeError::NoCurrentEntry)
    }
}
