//! Order lifecycle: status and payment-status state machines, their coupling,
//! and the order service operations built on them.

mod common;

use assert_matches::assert_matches;
use common::{address, basket_discount, customer, flat_rate, item, TestHarness};
use rstest::rstest;
use rust_decimal_macros::dec;
use stateset_commerce_core::{
    events::Event,
    models::{DiscountMethod, Order, OrderStatus, PaymentStatus},
    services::PaymentSync,
    ServiceError,
};
use strum::IntoEnumIterator;
use uuid::Uuid;

fn order_in(status: OrderStatus, payment_status: PaymentStatus) -> Order {
    let mut order = Order::new(
        Uuid::new_v4(),
        vec![item(Uuid::new_v4(), 1500, 2)],
        "USD",
        None,
        None,
    )
    .unwrap();
    order.status = status;
    order.payment_status = payment_status;
    order
}

const ORDER_TRANSITIONS: &[(OrderStatus, OrderStatus)] = &[
    (OrderStatus::Pending, OrderStatus::Paid),
    (OrderStatus::Pending, OrderStatus::Cancelled),
    (OrderStatus::Paid, OrderStatus::Shipped),
    (OrderStatus::Paid, OrderStatus::Cancelled),
    (OrderStatus::Shipped, OrderStatus::Completed),
    (OrderStatus::Shipped, OrderStatus::Cancelled),
];

const PAYMENT_TRANSITIONS: &[(PaymentStatus, PaymentStatus)] = &[
    (PaymentStatus::Pending, PaymentStatus::Authorized),
    (PaymentStatus::Pending, PaymentStatus::Failed),
    (PaymentStatus::Authorized, PaymentStatus::Captured),
    (PaymentStatus::Authorized, PaymentStatus::Refunded),
    (PaymentStatus::Authorized, PaymentStatus::Cancelled),
    (PaymentStatus::Captured, PaymentStatus::Refunded),
];

#[test]
fn test_order_transition_matrix_is_exhaustive() {
    for from in OrderStatus::iter() {
        for to in OrderStatus::iter() {
            let mut order = order_in(from, PaymentStatus::Pending);
            let allowed = ORDER_TRANSITIONS.contains(&(from, to));
            match order.update_status(to) {
                Ok(()) => {
                    assert!(allowed, "{} -> {} should be rejected", from, to);
                    assert_eq!(order.status, to);
                }
                Err(e) => {
                    assert!(!allowed, "{} -> {} should be allowed", from, to);
                    assert_matches!(e, ServiceError::InvalidStatusTransition { .. });
                    let message = e.to_string();
                    assert!(message.contains(from.as_ref()) && message.contains(to.as_ref()));
                    assert_eq!(order.status, from);
                }
            }
        }
    }
}

#[test]
fn test_payment_transition_matrix_is_exhaustive() {
    for from in PaymentStatus::iter() {
        for to in PaymentStatus::iter() {
            let mut order = order_in(OrderStatus::Pending, from);
            let allowed = PAYMENT_TRANSITIONS.contains(&(from, to));
            assert_eq!(
                order.update_payment_status(to).is_ok(),
                allowed,
                "payment {} -> {}",
                from,
                to
            );
        }
    }
}

#[rstest]
#[case(OrderStatus::Cancelled)]
#[case(OrderStatus::Completed)]
fn test_terminal_order_states_have_no_exits(#[case] status: OrderStatus) {
    assert!(status.is_terminal());
    assert!(status.allowed_transitions().is_empty());
}

#[rstest]
#[case(OrderStatus::Cancelled, true)]
#[case(OrderStatus::Completed, true)]
#[case(OrderStatus::Paid, false)]
fn test_closing_states_stamp_completion(#[case] target: OrderStatus, #[case] stamped: bool) {
    let from = match target {
        OrderStatus::Completed => OrderStatus::Shipped,
        _ => OrderStatus::Pending,
    };
    let mut order = order_in(from, PaymentStatus::Pending);
    order.update_status(target).unwrap();
    assert_eq!(order.completed_at.is_some(), stamped);
}

#[rstest]
#[case::authorize_pays(OrderStatus::Pending, PaymentStatus::Pending, PaymentStatus::Authorized, OrderStatus::Paid)]
#[case::failure_cancels(OrderStatus::Pending, PaymentStatus::Pending, PaymentStatus::Failed, OrderStatus::Cancelled)]
#[case::capture_after_shipping_completes(OrderStatus::Shipped, PaymentStatus::Authorized, PaymentStatus::Captured, OrderStatus::Completed)]
#[case::capture_before_shipping(OrderStatus::Paid, PaymentStatus::Authorized, PaymentStatus::Captured, OrderStatus::Paid)]
#[case::void_cancels_paid(OrderStatus::Paid, PaymentStatus::Authorized, PaymentStatus::Cancelled, OrderStatus::Cancelled)]
#[case::void_leaves_shipped(OrderStatus::Shipped, PaymentStatus::Authorized, PaymentStatus::Cancelled, OrderStatus::Shipped)]
#[case::refund_keeps_completed(OrderStatus::Completed, PaymentStatus::Captured, PaymentStatus::Refunded, OrderStatus::Completed)]
fn test_payment_status_drives_order_status(
    #[case] order_status: OrderStatus,
    #[case] payment_from: PaymentStatus,
    #[case] payment_to: PaymentStatus,
    #[case] expected: OrderStatus,
) {
    let mut order = order_in(order_status, payment_from);
    order.update_payment_status(payment_to).unwrap();
    assert_eq!(order.payment_status, payment_to);
    assert_eq!(order.status, expected);
}

#[tokio::test]
async fn test_create_order_assigns_sequential_numbers() {
    let app = TestHarness::new().await;
    let user = Uuid::new_v4();

    let first = app
        .orders
        .create_order(user, vec![item(Uuid::new_v4(), 1000, 1)], "USD", Some(address("US")), None)
        .await
        .unwrap();
    let second = app
        .orders
        .create_guest_order(vec![item(Uuid::new_v4(), 500, 3)], "USD", customer(), None, None)
        .await
        .unwrap();

    assert!(first.order_number.ends_with("-000001"));
    assert!(second.order_number.ends_with("-000002"));
    assert!(!first.has_temporary_number());
    assert_eq!(second.total_amount, 1500);

    let mine = app.orders.orders_for_user(user).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].metadata.id, first.metadata.id);
}

#[tokio::test]
async fn test_create_order_validates_input() {
    let app = TestHarness::new().await;
    assert_matches!(
        app.orders.create_order(Uuid::new_v4(), vec![], "USD", None, None).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        app.orders
            .create_order(Uuid::nil(), vec![item(Uuid::new_v4(), 100, 1)], "USD", None, None)
            .await,
        Err(ServiceError::ValidationError(_))
    );
    let mut bad_customer = customer();
    bad_customer.email = "not-an-email".to_string();
    assert_matches!(
        app.orders
            .create_guest_order(vec![item(Uuid::new_v4(), 100, 1)], "USD", bad_customer, None, None)
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn test_discount_and_shipping_keep_final_amount_consistent() {
    let app = TestHarness::new().await;
    app.seed_discount(basket_discount("TWENTY", DiscountMethod::Percentage, dec!(20)))
        .await;
    let method = app.shipping.create_method("Express", Some(1)).await.unwrap();
    let zone = app.shipping.create_zone("World", vec!["US".into(), "DK".into()]).await.unwrap();
    let rate = app
        .shipping
        .create_rate(flat_rate(method.metadata.id, zone.metadata.id, 1200))
        .await
        .unwrap();

    let order = app
        .orders
        .create_order(Uuid::new_v4(), vec![item(Uuid::new_v4(), 5000, 2)], "USD", None, None)
        .await
        .unwrap();
    let id = order.metadata.id;

    let order = app.orders.set_shipping_rate(id, Some(rate.metadata.id)).await.unwrap();
    assert_eq!(order.final_amount, 10_000 + 1200);

    let order = app.orders.apply_discount_code(id, "twenty").await.unwrap();
    assert_eq!(order.discount_amount, 2000);
    assert_eq!(order.final_amount, 10_000 + 1200 - 2000);

    assert_matches!(
        app.orders.apply_discount_code(id, "TWENTY").await,
        Err(ServiceError::InvalidOperation(_))
    );

    let order = app.orders.set_shipping_rate(id, None).await.unwrap();
    assert_eq!(order.final_amount, 10_000 - 2000);

    let order = app.orders.remove_discount(id).await.unwrap();
    assert_eq!(order.final_amount, 10_000);
    assert!(order.applied_discount.is_none());
}

#[tokio::test]
async fn test_paid_order_cannot_be_repriced() {
    let app = TestHarness::new().await;
    app.seed_discount(basket_discount("LATE", DiscountMethod::Fixed, dec!(1)))
        .await;
    let order = app
        .orders
        .create_order(Uuid::new_v4(), vec![item(Uuid::new_v4(), 900, 1)], "USD", None, None)
        .await
        .unwrap();
    let id = order.metadata.id;

    app.orders
        .sync_payment_status(id, PaymentStatus::Authorized)
        .await
        .unwrap();
    assert_matches!(
        app.orders.apply_discount_code(id, "LATE").await,
        Err(ServiceError::InvalidOperation(_))
    );
}

#[tokio::test]
async fn test_status_changes_publish_events() {
    let mut app = TestHarness::new().await;
    let order = app
        .orders
        .create_order(Uuid::new_v4(), vec![item(Uuid::new_v4(), 700, 1)], "USD", None, None)
        .await
        .unwrap();
    let id = order.metadata.id;
    app.drain_events();

    app.orders.update_status(id, OrderStatus::Paid).await.unwrap();
    assert_matches!(
        app.orders.update_status(id, OrderStatus::Completed).await,
        Err(ServiceError::InvalidStatusTransition { .. })
    );
    let order = app.orders.cancel_order(id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(order.completed_at.is_some());

    let events = app.drain_events();
    assert_eq!(
        events,
        vec![
            Event::OrderStatusChanged {
                order_id: id,
                old_status: OrderStatus::Pending,
                new_status: OrderStatus::Paid,
            },
            Event::OrderStatusChanged {
                order_id: id,
                old_status: OrderStatus::Paid,
                new_status: OrderStatus::Cancelled,
            },
        ]
    );
}

#[tokio::test]
async fn test_sync_payment_status_tolerates_redelivery() {
    let app = TestHarness::new().await;
    let order = app
        .orders
        .create_order(Uuid::new_v4(), vec![item(Uuid::new_v4(), 700, 1)], "USD", None, None)
        .await
        .unwrap();
    let id = order.metadata.id;

    let updated = app
        .orders
        .sync_payment_status(id, PaymentStatus::Authorized)
        .await
        .unwrap();
    assert_matches!(&updated, PaymentSync::Applied(order) if order.status == OrderStatus::Paid);
    assert!(updated.is_consistent());

    // Same status again, then a move the state machine refuses.
    assert_eq!(
        app.orders
            .sync_payment_status(id, PaymentStatus::Authorized)
            .await
            .unwrap(),
        PaymentSync::Unchanged
    );
    let refused = app
        .orders
        .sync_payment_status(id, PaymentStatus::Failed)
        .await
        .unwrap();
    assert_eq!(
        refused,
        PaymentSync::Rejected {
            current: PaymentStatus::Authorized
        }
    );
    assert!(!refused.is_consistent());

    let order = app.orders.get_order(id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Authorized);
}

#[tokio::test]
async fn test_missing_order_is_not_found() {
    let app = TestHarness::new().await;
    assert_matches!(
        app.orders.get_order(Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
}
