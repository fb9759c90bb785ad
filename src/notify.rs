use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events, one channel per staff member.
///
/// Delivery is fire-and-forget: a slow or absent subscriber never holds up a write.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self { channels: DashMap::new() }
    }

    /// Subscribe to notifications for a staff member. Creates the channel if needed.
    pub fn subscribe(&self, staff_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(staff_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, staff_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&staff_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a staff member's channel; existing receivers see it close.
    pub fn remove(&self, staff_id: &Ulid) {
        self.channels.remove(staff_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let sid = Ulid::new();
        let mut rx = hub.subscribe(sid);

        let event = Event::StaffCreated { id: sid, name: None };
        hub.send(sid, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_staff_events_not_delivered() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx = hub.subscribe(a);
        hub.send(b, &Event::StaffRemoved { id: b });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let sid = Ulid::new();
        hub.send(sid, &Event::StaffRemoved { id: sid });
    }

    #[tokio::test]
    async fn remove_closes_channel() {
        let hub = NotifyHub::new();
        let sid = Ulid::new();
        let mut rx = hub.subscribe(sid);
        hub.remove(&sid);
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
    }
}
