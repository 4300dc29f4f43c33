use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{OrderStatus, PaymentStatus, TransactionStatus, TransactionType};

/// Domain events published by the services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Checkout events
    CheckoutCreated { checkout_id: Uuid, session_id: String },
    CheckoutUpdated(Uuid),
    CheckoutCompleted { checkout_id: Uuid, order_id: Uuid },
    CheckoutAbandoned(Uuid),
    CheckoutExpired(Uuid),
    CheckoutDeleted(Uuid),

    // Order events
    OrderCreated { order_id: Uuid, order_number: String },
    OrderUpdated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentStatusChanged {
        order_id: Uuid,
        old_status: PaymentStatus,
        new_status: PaymentStatus,
    },

    // Discount events
    DiscountRedeemed { discount_id: Uuid, code: String, usage: u32 },

    // Payment ledger events
    PaymentTransactionRecorded {
        transaction_id: Uuid,
        order_id: Uuid,
        transaction_type: TransactionType,
        status: TransactionStatus,
        amount: i64,
    },
    PaymentTransactionUpdated {
        transaction_id: Uuid,
        order_id: Uuid,
        old_status: TransactionStatus,
        new_status: TransactionStatus,
    },

    // Currency events
    CurrencyUpdated(String),
    DefaultCurrencyChanged { previous: Option<String>, current: String },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Bounded channel pair; hand the receiver to [`process_events`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event, waiting for channel capacity.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes without waiting. A full or closed channel drops the event
    /// with a warning; domain operations never fail because of it.
    pub async fn send_or_log(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(?event, "event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(?event, "event channel closed, dropping event");
            }
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Handler that writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        match event {
            Event::PaymentTransactionRecorded {
                status: TransactionStatus::Failed,
                order_id,
                transaction_type,
                ..
            } => warn!(%order_id, %transaction_type, "payment transaction failed"),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(%order_id, %old_status, %new_status, "order status changed"),
            other => info!(event = ?other, "domain event"),
        }
        Ok(())
    }
}

/// Drains the channel and fans each event out to every handler concurrently.
/// Handler failures are logged and do not stop the loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!(handlers = handlers.len(), "Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!(?event, "Received event");
        let results = join_all(handlers.iter().map(|handler| handler.handle_event(&event))).await;
        for err in results.into_iter().filter_map(Result::err) {
            error!(?event, error = %err, "Event handler failed");
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(&self, event: &Event) -> Result<(), String> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle_event(&self, _event: &Event) -> Result<(), String> {
            Err("boom".into())
        }
    }

    #[tokio::test]
    async fn test_events_fan_out_despite_failing_handler() {
        let (sender, rx) = EventSender::channel(8);
        let recorder = Arc::new(Recorder::default());
        let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(Failing), recorder.clone()];

        sender.send(Event::CheckoutUpdated(Uuid::nil())).await.unwrap();
        sender.send_or_log(Event::CurrencyUpdated("EUR".into())).await;
        drop(sender);

        process_events(rx, handlers).await;
        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], Event::CurrencyUpdated("EUR".into()));
    }

    #[tokio::test]
    async fn test_send_or_log_never_blocks_on_full_channel() {
        let (sender, mut rx) = EventSender::channel(1);
        sender.send_or_log(Event::CheckoutDeleted(Uuid::nil())).await;
        sender.send_or_log(Event::CheckoutExpired(Uuid::nil())).await;
        assert_eq!(rx.recv().await, Some(Event::CheckoutDeleted(Uuid::nil())));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_status_fields_serialize_as_snake_case() {
        let event = Event::PaymentTransactionRecorded {
            transaction_id: Uuid::nil(),
            order_id: Uuid::nil(),
            transaction_type: TransactionType::Capture,
            status: TransactionStatus::Successful,
            amount: 1250,
        };
        let json = serde_json::to_value(&event).unwrap();
        let body = &json["PaymentTransactionRecorded"];
        assert_eq!(body["transaction_type"], "capture");
        assert_eq!(body["status"], "successful");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
