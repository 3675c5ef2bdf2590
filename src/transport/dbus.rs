//! D-Bus transport and state controller.
//!
//! Messages matched on the bus are queued by the connection's receive
//! callback and turned into envelopes on the receiving thread. The changed
//! properties are decoded straight from the message iterator: entries are
//! entered one at a time and unwatched values are stepped over without being
//! read.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use dbus::arg::{ArgType, Iter, TypeMismatchError, Variant};
use dbus::blocking::Connection;
use dbus::channel::{MatchingReceiver, Token};
use dbus::message::{MatchRule, MessageType};
use dbus::strings::{BusName, Interface, Member, Path};
use dbus::Message;
use tracing::{debug, trace};

use crate::config::{BusKind, TransitionRequest, PROPERTIES_CHANGED_MEMBER, PROPERTIES_INTERFACE};
use crate::error::{ActionError, EnvelopeError, TransportError};
use crate::monitor::envelope::{ChangeEnvelope, ChangedProperties};
use crate::monitor::subscription::{SignalFilter, SubscriptionId};

use super::{NotificationTransport, StateController};

/// How long one `process` call may block waiting for bus traffic.
const PROCESS_WAIT: Duration = Duration::from_secs(60);

fn open(bus: BusKind) -> Result<Connection, TransportError> {
    let conn = match bus {
        BusKind::System => Connection::new_system(),
        BusKind::Session => Connection::new_session(),
    };
    conn.map_err(|e| TransportError::Connect {
        message: describe(&e),
    })
}

fn describe(err: &dbus::Error) -> String {
    match (err.name(), err.message()) {
        (Some(name), Some(message)) => format!("{name}: {message}"),
        (Some(name), None) => name.to_string(),
        (None, Some(message)) => message.to_string(),
        (None, None) => "unknown D-Bus error".to_string(),
    }
}

fn mismatch(err: &TypeMismatchError) -> EnvelopeError {
    EnvelopeError::type_mismatch(
        format!("{:?}", err.expected_arg_type()),
        format!("{:?}", err.found_arg_type()),
    )
}

struct MatchEntry {
    filter: SignalFilter,
    rule: String,
    token: Token,
}

fn is_wanted(matches: &HashMap<SubscriptionId, MatchEntry>, envelope: &DbusEnvelope) -> bool {
    matches.values().any(|m| {
        m.filter.matches(
            PROPERTIES_INTERFACE,
            PROPERTIES_CHANGED_MEMBER,
            envelope.changed_interface.as_deref(),
        )
    })
}

/// Signals queued by receive callbacks, in delivery order.
///
/// The inbox holds a sender of its own, so the queue never disconnects: only
/// the connection can fail.
struct Inbox {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl Inbox {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    fn sender(&self) -> Sender<Message> {
        self.tx.clone()
    }

    /// Next queued `PropertiesChanged` signal accepted by `wanted`, dropping
    /// everything in front of it.
    fn pop(&self, wanted: impl Fn(&DbusEnvelope) -> bool) -> Option<DbusEnvelope> {
        while let Ok(msg) = self.rx.try_recv() {
            let Some(envelope) = DbusEnvelope::from_message(msg) else {
                continue;
            };
            if wanted(&envelope) {
                return Some(envelope);
            }
            trace!(path = ?envelope.path, "no match for signal");
        }
        None
    }
}

/// Notification transport over a D-Bus connection.
pub struct DbusTransport {
    conn: Connection,
    inbox: Inbox,
    matches: HashMap<SubscriptionId, MatchEntry>,
}

impl DbusTransport {
    /// Connect to the system or session bus.
    pub fn connect(bus: BusKind) -> Result<Self, TransportError> {
        let conn = open(bus)?;
        debug!(?bus, "connected to bus");
        Ok(Self {
            conn,
            inbox: Inbox::new(),
            matches: HashMap::new(),
        })
    }
}

impl NotificationTransport for DbusTransport {
    type Envelope = DbusEnvelope;

    fn add_match(&mut self, filter: &SignalFilter) -> Result<SubscriptionId, TransportError> {
        let subscribe_err = |message: String| TransportError::Subscribe { message };

        let interface = Interface::new(filter.interface.clone()).map_err(subscribe_err)?;
        let member = Member::new(filter.member.clone()).map_err(subscribe_err)?;

        let rule = filter.match_rule();
        self.conn
            .add_match_no_cb(&rule)
            .map_err(|e| subscribe_err(describe(&e)))?;

        let tx = self.inbox.sender();
        let token = self.conn.start_receive(
            MatchRule::new_signal(interface, member),
            Box::new(move |msg, _| tx.send(msg).is_ok()),
        );

        let id = SubscriptionId::new();
        self.matches.insert(
            id,
            MatchEntry {
                filter: filter.clone(),
                rule,
                token,
            },
        );
        Ok(id)
    }

    fn remove_match(&mut self, id: SubscriptionId) {
        let Some(entry) = self.matches.remove(&id) else {
            return;
        };
        self.conn.stop_receive(entry.token);
        if let Err(e) = self.conn.remove_match_no_cb(&entry.rule) {
            debug!(error = %describe(&e), "failed to remove bus match");
        }
    }

    fn next_envelope(&mut self) -> Result<Self::Envelope, TransportError> {
        loop {
            let matches = &self.matches;
            if let Some(envelope) = self.inbox.pop(|envelope| is_wanted(matches, envelope)) {
                return Ok(envelope);
            }

            // Processes pending traffic, or waits for some when idle.
            self.conn
                .process(PROCESS_WAIT)
                .map_err(|e| TransportError::Process {
                    message: describe(&e),
                })?;
        }
    }
}

/// A `PropertiesChanged` signal received from the bus.
pub struct DbusEnvelope {
    msg: Message,
    path: Option<String>,
    changed_interface: Option<String>,
}

impl DbusEnvelope {
    /// Wrap `msg` if it is a `PropertiesChanged` signal.
    #[must_use]
    pub fn from_message(msg: Message) -> Option<Self> {
        if msg.msg_type() != MessageType::Signal {
            return None;
        }
        let is_properties_changed = msg.interface().is_some_and(|i| &*i == PROPERTIES_INTERFACE)
            && msg.member().is_some_and(|m| &*m == PROPERTIES_CHANGED_MEMBER);
        if !is_properties_changed {
            return None;
        }

        let path = msg.path().map(|p| (*p).to_owned());
        let changed_interface = msg.iter_init().read::<String>().ok();
        Some(Self {
            msg,
            path,
            changed_interface,
        })
    }
}

impl ChangeEnvelope for DbusEnvelope {
    type Properties<'a> = DbusProperties<'a>;

    fn interface_name(&self) -> Result<Cow<'_, str>, EnvelopeError> {
        match &self.changed_interface {
            Some(name) => Ok(Cow::Borrowed(name.as_str())),
            None => {
                let found = self.msg.iter_init().arg_type();
                Err(EnvelopeError::type_mismatch("String", format!("{found:?}")))
            }
        }
    }

    fn entity_identifier(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn changed_properties(&self) -> Result<Self::Properties<'_>, EnvelopeError> {
        let mut args = self.msg.iter_init();
        if !args.next() {
            return Err(EnvelopeError::MissingField {
                field: "changed_properties".to_string(),
            });
        }
        let found = args.arg_type();
        let array = args
            .recurse(ArgType::Array)
            .ok_or_else(|| EnvelopeError::type_mismatch("Array", format!("{found:?}")))?;

        Ok(DbusProperties {
            array,
            entry: None,
            started: false,
            position: 0,
        })
    }
}

/// Cursor over the `a{sv}` argument of a `PropertiesChanged` signal.
pub struct DbusProperties<'a> {
    array: Iter<'a>,
    entry: Option<Iter<'a>>,
    started: bool,
    position: usize,
}

impl ChangedProperties for DbusProperties<'_> {
    fn next_name(&mut self) -> Result<Option<String>, EnvelopeError> {
        if self.started {
            self.array.next();
            self.position += 1;
        }
        self.started = true;
        self.entry = None;

        match self.array.arg_type() {
            ArgType::Invalid => Ok(None),
            ArgType::DictEntry => {
                let mut entry = self
                    .array
                    .recurse(ArgType::DictEntry)
                    .ok_or(EnvelopeError::Truncated {
                        position: self.position,
                    })?;
                let name = entry.read::<String>().map_err(|e| mismatch(&e))?;
                self.entry = Some(entry);
                Ok(Some(name))
            }
            other => Err(EnvelopeError::type_mismatch("DictEntry", format!("{other:?}"))),
        }
    }

    fn read_bool(&mut self) -> Result<bool, EnvelopeError> {
        let mut entry = self.entry.take().ok_or(EnvelopeError::NoCurrentEntry)?;
        entry
            .read::<Variant<bool>>()
            .map(|v| v.0)
            .map_err(|e| mismatch(&e))
    }

    fn skip_value(&mut self) -> Result<(), EnvelopeError> {
        // Advancing the outer iterator steps over the whole entry.
        self.entry
            .take()
            .map(|_| ())
            .ok_or(EnvelopeError::NoCurrentEntry)
    }
}

/// State controller that writes the transition property over D-Bus.
pub struct DbusStateController {
    conn: Connection,
    timeout: Duration,
}

impl DbusStateController {
    /// Open a dedicated connection for controller calls.
    pub fn connect(bus: BusKind, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            conn: open(bus)?,
            timeout,
        })
    }
}

impl StateController for DbusStateController {
    fn request_transition(&self, request: &TransitionRequest) -> Result<(), ActionError> {
        let invalid = |message: String| ActionError::Rejected {
            name: "invalid-request".to_string(),
            message,
        };
        let service = BusName::new(request.service.as_str()).map_err(invalid)?;
        let path = Path::new(request.object_path.as_str()).map_err(invalid)?;

        let proxy = self.conn.with_proxy(service, path, self.timeout);
        let result: Result<(), dbus::Error> = proxy.method_call(
            PROPERTIES_INTERFACE,
            "Set",
            (
                request.interface.as_str(),
                request.property.as_str(),
                Variant(request.value.as_str()),
            ),
        );
        result.map_err(|e| action_error(&e, self.timeout))
    }
}

fn action_error(err: &dbus::Error, timeout: Duration) -> ActionError {
    match err.name() {
        Some("org.freedesktop.DBus.Error.NoReply" | "org.freedesktop.DBus.Error.Timeout") => {
            ActionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
        }
        None
        | Some(
            "org.freedesktop.DBus.Error.ServiceUnknown"
            | "org.freedesktop.DBus.Error.NameHasNoOwner"
            | "org.freedesktop.DBus.Error.Disconnected",
        ) => ActionError::Unreachable {
            message: describe(err),
        },
        Some(name) => ActionError::Rejected {
            name: name.to_string(),
            message: err.message().unwrap_or_default().to_string(),
        },
    }
}
