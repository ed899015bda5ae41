//! Publish/subscribe fan-out between the IO loop and its consumers.
//!
//! One broadcast channel per topic. Subscribers poll their receiver from
//! whatever task or thread they live on, so nothing produced on the IO
//! loop ever runs consumer code on the IO loop's context. Dropping the
//! receiver unsubscribes; slow consumers see `Lagged`, never backpressure.

use crate::params::ParamEvent;
use crate::state::{AdsbTarget, StateSnapshot};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    DataUpdated,
    ConnectionChanged,
    ParamReceived,
    AdsbUpdated,
    ClearData,
}

#[derive(Debug, Clone)]
pub enum Event {
    DataUpdated(StateSnapshot),
    ConnectionChanged { connected: bool },
    Param(ParamEvent),
    AdsbUpdated(AdsbTarget),
    ClearData,
}

impl Event {
    pub fn topic(&self) -> EventTopic {
        match self {
            Event::DataUpdated(_) => EventTopic::DataUpdated,
            Event::ConnectionChanged { .. } => EventTopic::ConnectionChanged,
            Event::Param(_) => EventTopic::ParamReceived,
            Event::AdsbUpdated(_) => EventTopic::AdsbUpdated,
            Event::ClearData => EventTopic::ClearData,
        }
    }
}

#[derive(Debug)]
pub struct EventBus {
    data_updated: broadcast::Sender<Event>,
    connection_changed: broadcast::Sender<Event>,
    param_received: broadcast::Sender<Event>,
    adsb_updated: broadcast::Sender<Event>,
    clear_data: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            data_updated: broadcast::channel(CHANNEL_CAPACITY).0,
            connection_changed: broadcast::channel(CHANNEL_CAPACITY).0,
            param_received: broadcast::channel(CHANNEL_CAPACITY).0,
            adsb_updated: broadcast::channel(CHANNEL_CAPACITY).0,
            clear_data: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    fn channel(&self, topic: EventTopic) -> &broadcast::Sender<Event> {
        match topic {
            EventTopic::DataUpdated => &self.data_updated,
            EventTopic::ConnectionChanged => &self.connection_changed,
            EventTopic::ParamReceived => &self.param_received,
            EventTopic::AdsbUpdated => &self.adsb_updated,
            EventTopic::ClearData => &self.clear_data,
        }
    }

    pub fn subscribe(&self, topic: EventTopic) -> broadcast::Receiver<Event> {
        self.channel(topic).subscribe()
    }

    /// Used by the IO loop to skip snapshot construction when no screen
    /// is listening.
    pub fn has_subscribers(&self, topic: EventTopic) -> bool {
        self.channel(topic).receiver_count() > 0
    }

    /// Emit an event on its topic. A send with no live subscribers is
    /// not an error.
    pub fn emit(&self, event: Event) {
        let _ = self.channel(event.topic()).send(event);
    }
}
