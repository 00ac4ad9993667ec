use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events published by the checkout pipeline. Consumed in-process by
/// `process_events`; services fire and forget via `send_or_log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartItemRemoved { cart_id: Uuid, product_id: Uuid },
    CartCleared(Uuid),
    CartsMerged { guest_cart_id: Uuid, user_cart_id: Uuid },
    DiscountApplied { cart_id: Uuid, discount_id: Uuid },
    DiscountRemoved { cart_id: Uuid },

    // Checkout / order events
    ShippingSelected { cart_id: Uuid, service_code: String },
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Payment events
    PaymentInitialized { order_id: Uuid, correlation_id: String },
    PaymentSucceeded(Uuid),
    PaymentFailed(Uuid),

    // Shipment events
    ShipmentUpdated { shipment_id: Uuid, status: String },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging on failure instead of surfacing it. Event
    /// delivery never fails a request.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(err) = self.send(event).await {
            warn!("Event delivery failed: {}", err);
        }
    }
}

/// Background consumer for domain events. Currently logs; downstream
/// integrations (mail, analytics) hang off this loop.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(?event, "Domain event");
    }
    info!("Event channel closed; processor exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        sender.send(Event::OrderCreated(Uuid::nil())).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderCreated(id)) => assert_eq!(id, Uuid::nil()),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        // Must not panic or return an error to the caller
        sender.send_or_log(Event::CartCleared(Uuid::nil())).await;
    }
}
