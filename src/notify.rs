use dashmap::DashMap;
use serde_json::json;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for booking events, one channel per room.
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
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a room. Creates the channel if needed.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, room_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&room_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a room's channel (e.g. when the room is retired).
    pub fn remove(&self, room_id: &Ulid) {
        self.channels.remove(room_id);
    }
}

/// Compact JSON payload describing an event, for subscribers outside the process.
pub fn event_payload(event: &Event) -> String {
    let body = match event {
        Event::RoomCreated { room } | Event::RoomUpdated { room } => json!({
            "room_id": room.id.to_string(),
            "status": room.status.as_str(),
        }),
        Event::UserRegistered { user } | Event::UserUpdated { user } => json!({
            "user_id": user.id.to_string(),
            "suspended": user.suspended,
        }),
        Event::BookingConfirmed { booking } => json!({
            "id": booking.id.to_string(),
            "room_id": booking.room_id.to_string(),
            "start": booking.span.start,
            "end": booking.span.end,
            "status": booking.status.as_str(),
        }),
        Event::BookingRescheduled { id, room_id, span } => json!({
            "id": id.to_string(),
            "room_id": room_id.to_string(),
            "start": span.start,
            "end": span.end,
        }),
        Event::BookingStatusChanged { id, room_id, status } => json!({
            "id": id.to_string(),
            "room_id": room_id.to_string(),
            "status": status.as_str(),
        }),
    };
    json!({ "event": event.kind(), "data": body }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);

        let event = Event::BookingStatusChanged {
            id: Ulid::new(),
            room_id: rid,
            status: BookingStatus::Cancelled,
        };
        hub.send(rid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        hub.send(
            rid,
            &Event::BookingStatusChanged {
                id: Ulid::new(),
                room_id: rid,
                status: BookingStatus::Expired,
            },
        );
    }

    #[test]
    fn payload_is_json() {
        let id = Ulid::new();
        let rid = Ulid::new();
        let payload = event_payload(&Event::BookingRescheduled {
            id,
            room_id: rid,
            span: Span::new(1000, 2000),
        });
        let v: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(v["event"], "booking_rescheduled");
        assert_eq!(v["data"]["id"], id.to_string());
        assert_eq!(v["data"]["start"], 1000);
    }
}
