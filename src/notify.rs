use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, ScheduleDate};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for LISTEN/NOTIFY per schedule date.
pub struct NotifyHub {
    channels: DashMap<ScheduleDate, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for one date. Creates the channel if needed.
    pub fn subscribe(&self, date: ScheduleDate) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(date)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, date: ScheduleDate, event: &Event) {
        if let Some(sender) = self.channels.get(&date) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when its schedule is purged).
    pub fn remove(&self, date: &ScheduleDate) {
        self.channels.remove(date);
    }
}
