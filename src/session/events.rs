use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::MediaError;
use crate::format::Format;
use crate::models::{BufferFlags, BufferIndex, BufferInfo, PlaybackSpeed};
use crate::session::buffer::SharedMemory;
use crate::session::state::SessionState;

/// Event categories a subscriber can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    StateChanged,
    InputAvailable,
    OutputAvailable,
    OutputFormatChanged,
    Error,
    Info,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::StateChanged,
        EventType::InputAvailable,
        EventType::OutputAvailable,
        EventType::OutputFormatChanged,
        EventType::Error,
        EventType::Info,
    ];
}

/// Advisory notifications; none of them changes the session state
#[derive(Debug, Clone, PartialEq)]
pub enum InfoKind {
    SeekDone { position: Duration },
    PlaybackComplete,
    VolumeChanged { left: f32, right: f32 },
    SpeedChanged(PlaybackSpeed),
    PositionUpdate(Duration),
    EndOfStream,
    MaxDurationApproaching,
    MaxDurationReached,
    MaxFileSizeApproaching,
    MaxFileSizeReached,
    NextOutputFileStarted { uri: String },
    FirstFrameRendered,
}

impl fmt::Display for InfoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfoKind::SeekDone { position } => write!(f, "seek done at {}ms", position.as_millis()),
            InfoKind::PlaybackComplete => f.write_str("playback complete"),
            InfoKind::VolumeChanged { left, right } => write!(f, "volume {:.2}/{:.2}", left, right),
            InfoKind::SpeedChanged(speed) => write!(f, "speed {}", speed),
            InfoKind::PositionUpdate(position) => write!(f, "position {}ms", position.as_millis()),
            InfoKind::EndOfStream => f.write_str("end of stream"),
            InfoKind::MaxDurationApproaching => f.write_str("max duration approaching"),
            InfoKind::MaxDurationReached => f.write_str("max duration reached"),
            InfoKind::MaxFileSizeApproaching => f.write_str("max file size approaching"),
            InfoKind::MaxFileSizeReached => f.write_str("max file size reached"),
            InfoKind::NextOutputFileStarted { uri } => write!(f, "next output file started: {}", uri),
            InfoKind::FirstFrameRendered => f.write_str("first frame rendered"),
        }
    }
}

/// Payload delivered to subscribers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    InputAvailable {
        index: BufferIndex,
        memory: SharedMemory,
    },
    OutputAvailable {
        index: BufferIndex,
        info: BufferInfo,
        flags: BufferFlags,
        memory: SharedMemory,
    },
    OutputFormatChanged(Format),
    Error(MediaError),
    Info(InfoKind),
}

impl SessionEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            SessionEvent::StateChanged { .. } => EventType::StateChanged,
            SessionEvent::InputAvailable { .. } => EventType::InputAvailable,
            SessionEvent::OutputAvailable { .. } => EventType::OutputAvailable,
            SessionEvent::OutputFormatChanged(_) => EventType::OutputFormatChanged,
            SessionEvent::Error(_) => EventType::Error,
            SessionEvent::Info(_) => EventType::Info,
        }
    }
}

/// Callback form of a subscription
pub type EventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Handle used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum Subscriber {
    Handler(EventHandler),
    Channel(mpsc::UnboundedSender<SessionEvent>),
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<EventType, Vec<(SubscriptionId, Arc<Subscriber>)>>,
    closed: bool,
}

/// Fan-out of session events to registered handlers and channels.
/// Delivery runs on the session actor, outside the registry lock.
#[derive(Default)]
pub struct EventHub {
    registry: Mutex<Registry>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event_type: EventType, handler: EventHandler) -> Option<SubscriptionId> {
        self.register(&[event_type], Subscriber::Handler(handler))
    }

    /// Channel subscription for the listed types, all types when empty
    pub fn subscribe_channel(
        &self,
        event_types: &[EventType],
    ) -> Option<(SubscriptionId, mpsc::UnboundedReceiver<SessionEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let types = if event_types.is_empty() {
            &EventType::ALL[..]
        } else {
            event_types
        };
        self.register(types, Subscriber::Channel(tx)).map(|id| (id, rx))
    }

    fn register(&self, event_types: &[EventType], subscriber: Subscriber) -> Option<SubscriptionId> {
        let mut registry = self.registry.lock().ok()?;
        if registry.closed {
            return None;
        }
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        let subscriber = Arc::new(subscriber);
        for event_type in event_types {
            registry
                .subscribers
                .entry(*event_type)
                .or_default()
                .push((id, Arc::clone(&subscriber)));
        }
        Some(id)
    }

    /// Best-effort removal; an event already being delivered may still arrive
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut registry) = self.registry.lock() else {
            return false;
        };
        let mut removed = false;
        for subscribers in registry.subscribers.values_mut() {
            let before = subscribers.len();
            subscribers.retain(|(sub_id, _)| *sub_id != id);
            removed |= subscribers.len() != before;
        }
        removed
    }

    /// Deliver `event` to every subscriber of its type. Returns how many
    /// subscribers received it.
    pub fn publish(&self, event: &SessionEvent) -> usize {
        let targets: Vec<(SubscriptionId, Arc<Subscriber>)> = match self.registry.lock() {
            Ok(registry) => registry
                .subscribers
                .get(&event.event_type())
                .cloned()
                .unwrap_or_default(),
            Err(_) => return 0,
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, subscriber) in targets {
            match subscriber.as_ref() {
                Subscriber::Handler(handler) => {
                    handler(event);
                    delivered += 1;
                }
                Subscriber::Channel(tx) => {
                    if tx.send(event.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        closed.push(id);
                    }
                }
            }
        }

        for id in closed {
            self.unsubscribe(id);
        }
        delivered
    }

    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.registry
            .lock()
            .map(|registry| registry.subscribers.get(&event_type).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Drop every subscription and refuse new ones
    pub fn close(&self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.subscribers.clear();
            registry.closed = true;
        }
    }
}
