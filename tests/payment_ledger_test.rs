//! Payment-transaction ledger: idempotent ingestion of provider events,
//! balance guards and the coupling to order payment status.

mod common;

use assert_matches::assert_matches;
use chrono::{Datelike, Utc};
use common::{item, payment_event, TestHarness};
use stateset_commerce_core::{
    events::Event,
    models::{OrderStatus, PaymentBalances, PaymentStatus, TransactionStatus, TransactionType},
    ServiceError,
};
use uuid::Uuid;

use TransactionStatus::{Failed, Pending, Successful};
use TransactionType::{Authorize, Cancel, Capture, Refund};

async fn order_of(app: &TestHarness, amount: i64) -> Uuid {
    app.orders
        .create_order(Uuid::new_v4(), vec![item(Uuid::new_v4(), amount, 1)], "USD", None, None)
        .await
        .unwrap()
        .metadata
        .id
}

#[tokio::test]
async fn test_authorize_capture_refund_lifecycle() {
    let app = TestHarness::new().await;
    let order_id = order_of(&app, 10_000).await;

    let auth = app
        .payments
        .record_transaction(payment_event(order_id, Authorize, Successful, 10_000, "evt_auth"))
        .await
        .unwrap();
    assert!(auth.created);
    assert!(auth.payment_status_applied);
    assert_eq!(
        auth.transaction.transaction_id.as_deref(),
        Some(format!("TXN-AUTH-{}-001", Utc::now().year()).as_str())
    );
    let order = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Authorized);
    assert_eq!(order.status, OrderStatus::Paid);

    app.payments
        .record_transaction(payment_event(order_id, Capture, Successful, 10_000, "evt_capt"))
        .await
        .unwrap();
    let order = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Captured);

    app.payments
        .record_transaction(payment_event(order_id, Refund, Successful, 4_000, "evt_refund"))
        .await
        .unwrap();
    let order = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Refunded);

    let balances = app.payments.balances(order_id).await.unwrap();
    assert_eq!(
        balances,
        PaymentBalances {
            authorized: 10_000,
            captured: 10_000,
            refunded: 4_000,
        }
    );
    assert_eq!(balances.refundable(), 6_000);
    assert_eq!(app.payments.transactions_for_order(order_id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_redelivered_event_is_recorded_once() {
    let mut app = TestHarness::new().await;
    let order_id = order_of(&app, 5_000).await;
    let event = payment_event(order_id, Authorize, Successful, 5_000, "evt_dup");

    let first = app.payments.record_transaction(event.clone()).await.unwrap();
    app.drain_events();
    let second = app.payments.record_transaction(event).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.transaction.metadata.id, second.transaction.metadata.id);
    assert_eq!(app.payments.transactions_for_order(order_id).await.unwrap().len(), 1);
    assert_eq!(app.payments.balances(order_id).await.unwrap().authorized, 5_000);
    assert!(app.drain_events().is_empty());
}

#[tokio::test]
async fn test_concurrent_redelivery_creates_one_record() {
    let app = TestHarness::new().await;
    let order_id = order_of(&app, 5_000).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let payments = app.payments.clone();
            let event = payment_event(order_id, Authorize, Successful, 5_000, "evt_race");
            tokio::spawn(async move { payments.record_transaction(event).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().created {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert_eq!(app.payments.transactions_for_order(order_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_conflicting_amount_for_same_key_is_rejected() {
    let app = TestHarness::new().await;
    let order_id = order_of(&app, 5_000).await;
    app.payments
        .record_transaction(payment_event(order_id, Authorize, Successful, 5_000, "evt_amt"))
        .await
        .unwrap();

    assert_matches!(
        app.payments
            .record_transaction(payment_event(order_id, Authorize, Successful, 4_999, "evt_amt"))
            .await,
        Err(ServiceError::Conflict(_))
    );
    assert_eq!(app.payments.balances(order_id).await.unwrap().authorized, 5_000);
}

#[tokio::test]
async fn test_redelivery_with_new_status_updates_record() {
    let mut app = TestHarness::new().await;
    let order_id = order_of(&app, 3_000).await;

    let pending = app
        .payments
        .record_transaction(payment_event(order_id, Authorize, Pending, 3_000, "evt_settle"))
        .await
        .unwrap();
    assert_eq!(pending.transaction.authorized_amount, 0);
    let order = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    app.drain_events();

    let settled = app
        .payments
        .record_transaction(payment_event(order_id, Authorize, Successful, 3_000, "evt_settle"))
        .await
        .unwrap();
    assert!(!settled.created);
    assert_eq!(settled.transaction.status, Successful);
    assert_eq!(settled.transaction.authorized_amount, 3_000);

    let events = app.drain_events();
    assert!(events.contains(&Event::PaymentTransactionUpdated {
        transaction_id: pending.transaction.metadata.id,
        order_id,
        old_status: Pending,
        new_status: Successful,
    }));
    let order = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Authorized);
}

#[tokio::test]
async fn test_dedupes_on_external_id_without_key() {
    let app = TestHarness::new().await;
    let order_id = order_of(&app, 2_000).await;
    let mut event = payment_event(order_id, Capture, Successful, 2_000, "unused");
    event.idempotency_key = None;
    event.external_id = Some("ch_123".to_string());

    assert!(app.payments.record_transaction(event.clone()).await.unwrap().created);
    assert!(!app.payments.record_transaction(event).await.unwrap().created);
    assert_eq!(app.payments.balances(order_id).await.unwrap().captured, 2_000);
}

#[tokio::test]
async fn test_capture_cannot_exceed_authorization() {
    let app = TestHarness::new().await;
    let order_id = order_of(&app, 10_000).await;
    app.payments
        .record_transaction(payment_event(order_id, Authorize, Successful, 6_000, "evt_a"))
        .await
        .unwrap();
    app.payments
        .record_transaction(payment_event(order_id, Capture, Successful, 4_000, "evt_c1"))
        .await
        .unwrap();

    assert_matches!(
        app.payments
            .record_transaction(payment_event(order_id, Capture, Successful, 2_500, "evt_c2"))
            .await,
        Err(ServiceError::InvalidOperation(_))
    );
    assert_eq!(app.payments.balances(order_id).await.unwrap().captured, 4_000);
}

#[tokio::test]
async fn test_refund_cannot_exceed_captured() {
    let app = TestHarness::new().await;
    let order_id = order_of(&app, 10_000).await;
    app.payments
        .record_transaction(payment_event(order_id, Capture, Successful, 3_000, "evt_c"))
        .await
        .unwrap();

    assert_matches!(
        app.payments
            .record_transaction(payment_event(order_id, Refund, Successful, 3_001, "evt_r"))
            .await,
        Err(ServiceError::InvalidOperation(_))
    );

    // A pending refund is not checked until it settles.
    let pending = app
        .payments
        .record_transaction(payment_event(order_id, Refund, Pending, 5_000, "evt_r2"))
        .await
        .unwrap();
    assert_matches!(
        app.payments
            .update_transaction_status(pending.transaction.metadata.id, Successful)
            .await,
        Err(ServiceError::InvalidOperation(_))
    );
}

#[tokio::test]
async fn test_failed_authorization_fails_order() {
    let app = TestHarness::new().await;
    let order_id = order_of(&app, 1_000).await;
    app.payments
        .record_transaction(payment_event(order_id, Authorize, Failed, 1_000, "evt_fail"))
        .await
        .unwrap();

    let order = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(app.payments.balances(order_id).await.unwrap(), PaymentBalances::default());
}

#[tokio::test]
async fn test_cancel_voids_authorized_order() {
    let app = TestHarness::new().await;
    let order_id = order_of(&app, 1_000).await;
    app.payments
        .record_transaction(payment_event(order_id, Authorize, Successful, 1_000, "evt_a"))
        .await
        .unwrap();
    let cancel = app
        .payments
        .record_transaction(payment_event(order_id, Cancel, Successful, 0, "evt_void"))
        .await
        .unwrap();
    assert!(cancel
        .transaction
        .transaction_id
        .as_deref()
        .is_some_and(|id| id.starts_with("TXN-CANCEL-")));

    let order = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Cancelled);
    assert_eq!(order.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_failing_a_settled_capture_releases_its_balance() {
    let app = TestHarness::new().await;
    let order_id = order_of(&app, 10_000).await;
    let capture = app
        .payments
        .record_transaction(payment_event(order_id, Capture, Successful, 10_000, "evt_c"))
        .await
        .unwrap();

    let failed = app
        .payments
        .update_transaction_status(capture.transaction.metadata.id, Failed)
        .await
        .unwrap();
    assert_eq!(failed.transaction.captured_amount, 0);
    assert_eq!(failed.transaction.amount, 10_000);
    assert_eq!(app.payments.balances(order_id).await.unwrap().captured, 0);

    assert_matches!(
        app.payments
            .update_transaction_status(capture.transaction.metadata.id, Pending)
            .await,
        Err(ServiceError::InvalidStatusTransition { .. })
    );
}

#[tokio::test]
async fn test_capture_beyond_authorization_after_refund_is_rejected() {
    let app = TestHarness::new().await;
    let order_id = order_of(&app, 8_000).await;
    for (kind, amount, key) in [
        (Authorize, 8_000, "evt_1"),
        (Capture, 8_000, "evt_2"),
        (Refund, 8_000, "evt_3"),
    ] {
        app.payments
            .record_transaction(payment_event(order_id, kind, Successful, amount, key))
            .await
            .unwrap();
    }

    // Same capture under a new key: nothing is left to capture.
    assert_matches!(
        app.payments
            .record_transaction(payment_event(order_id, Capture, Successful, 8_000, "evt_4"))
            .await,
        Err(ServiceError::InvalidOperation(_))
    );
    let order = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn test_unknown_order_is_rejected() {
    let app = TestHarness::new().await;
    assert_matches!(
        app.payments
            .record_transaction(payment_event(Uuid::new_v4(), Authorize, Successful, 100, "evt_x"))
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        app.payments.get_transaction(Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn test_transaction_ids_follow_per_type_sequence() {
    let app = TestHarness::new().await;
    let order_id = order_of(&app, 10_000).await;
    let year = Utc::now().year();

    let mut ids = Vec::new();
    for (kind, amount, key) in [
        (Authorize, 10_000, "s1"),
        (Capture, 2_000, "s2"),
        (Capture, 3_000, "s3"),
    ] {
        let recorded = app
            .payments
            .record_transaction(payment_event(order_id, kind, Successful, amount, key))
            .await
            .unwrap();
        ids.push(recorded.transaction.transaction_id.unwrap());
    }
    assert_eq!(
        ids,
        vec![
            format!("TXN-AUTH-{}-001", year),
            format!("TXN-CAPT-{}-001", year),
            format!("TXN-CAPT-{}-002", year),
        ]
    );
}

#[tokio::test]
async fn test_refund_of_uncaptured_authorization() {
    let app = TestHarness::new().await;
    let order_id = order_of(&app, 10_000).await;
    app.payments
        .record_transaction(payment_event(order_id, Authorize, Successful, 10_000, "evt_auth"))
        .await
        .unwrap();

    assert_matches!(
        app.payments
            .record_transaction(payment_event(order_id, Refund, Successful, 10_001, "evt_over"))
            .await,
        Err(ServiceError::InvalidOperation(_))
    );
    let refund = app
        .payments
        .record_transaction(payment_event(order_id, Refund, Successful, 10_000, "evt_refund"))
        .await
        .unwrap();
    assert!(refund.created);
    assert!(refund.payment_status_applied);

    let order = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(app.payments.transactions_for_order(order_id).await.unwrap().len(), 2);
    assert_eq!(app.payments.balances(order_id).await.unwrap().refundable(), 0);
}

#[tokio::test]
async fn test_late_pending_copy_after_settlement_is_ignored() {
    let mut app = TestHarness::new().await;
    let order_id = order_of(&app, 4_000).await;
    let pending = payment_event(order_id, Authorize, Pending, 4_000, "evt_late");

    app.payments.record_transaction(pending.clone()).await.unwrap();
    app.payments
        .record_transaction(payment_event(order_id, Authorize, Successful, 4_000, "evt_late"))
        .await
        .unwrap();
    app.drain_events();

    let late = app.payments.record_transaction(pending).await.unwrap();
    assert!(!late.created);
    assert_eq!(late.transaction.status, Successful);
    assert_eq!(late.transaction.authorized_amount, 4_000);
    assert!(app.drain_events().is_empty());

    let order = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Authorized);
    assert_eq!(app.payments.balances(order_id).await.unwrap().authorized, 4_000);
}

#[tokio::test]
async fn test_refused_order_status_is_reported() {
    let app = TestHarness::new().await;
    let order_id = order_of(&app, 2_500).await;

    // Capture with no prior authorization: pending -> captured is not a legal move.
    let capture = app
        .payments
        .record_transaction(payment_event(order_id, Capture, Successful, 2_500, "evt_early"))
        .await
        .unwrap();
    assert!(capture.created);
    assert!(!capture.payment_status_applied);
    assert_eq!(capture.transaction.captured_amount, 2_500);

    let order = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.status, OrderStatus::Pending);

    // A pending event drives no order status, so nothing is refused.
    let pending = app
        .payments
        .record_transaction(payment_event(order_id, Authorize, Pending, 2_500, "evt_pend"))
        .await
        .unwrap();
    assert!(pending.payment_status_applied);
}
