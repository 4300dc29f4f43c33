#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use stateset_commerce_core::{
    events::{Event, EventSender},
    models::{
        Address, CheckoutPolicy, CustomerDetails, Discount, DiscountMethod, DiscountType,
        NewCurrency, NewDiscount, NewOrderItem, NewPaymentTransaction, NewShippingRate,
        StaticCategoryResolver, TransactionStatus, TransactionType,
    },
    repositories::{DiscountRepository, InMemoryStore},
    services::{CheckoutService, CurrencyService, OrderService, PaymentService, ShippingService},
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Fully wired services over a fresh in-memory store.
pub struct TestHarness {
    pub store: InMemoryStore,
    pub currencies: CurrencyService,
    pub shipping: ShippingService,
    pub orders: OrderService,
    pub checkouts: CheckoutService,
    pub payments: PaymentService,
    events: mpsc::Receiver<Event>,
}

impl TestHarness {
    /// Harness with USD (default, rate 1.0) and EUR (rate 0.85) registered.
    pub async fn new() -> Self {
        Self::with_categories(StaticCategoryResolver::new()).await
    }

    pub async fn with_categories(categories: StaticCategoryResolver) -> Self {
        let store = InMemoryStore::new();
        let (sender, events) = EventSender::channel(1024);
        let event_sender = Arc::new(sender);
        let repo = Arc::new(store.clone());
        let categories = Arc::new(categories);

        let currencies = CurrencyService::new(repo.clone(), event_sender.clone());
        let shipping = ShippingService::new(repo.clone());
        let orders = OrderService::new(
            repo.clone(),
            repo.clone(),
            shipping.clone(),
            categories.clone(),
            event_sender.clone(),
        );
        let checkouts = CheckoutService::new(
            repo.clone(),
            repo.clone(),
            orders.clone(),
            currencies.clone(),
            shipping.clone(),
            categories,
            event_sender.clone(),
            CheckoutPolicy::default(),
        );
        let payments = PaymentService::new(repo, orders.clone(), event_sender);

        currencies
            .register(currency("USD", "US Dollar", "$", 1.0))
            .await
            .expect("register USD");
        currencies
            .register(currency("EUR", "Euro", "€", 0.85))
            .await
            .expect("register EUR");

        Self {
            store,
            currencies,
            shipping,
            orders,
            checkouts,
            payments,
            events,
        }
    }

    /// Saves a discount straight into the store.
    pub async fn seed_discount(&self, input: NewDiscount) -> Discount {
        let discount = Discount::new(input).expect("valid discount");
        DiscountRepository::save(&self.store, &discount)
            .await
            .expect("save discount");
        discount
    }

    /// Everything published since the last call.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn currency(code: &str, name: &str, symbol: &str, rate: f64) -> NewCurrency {
    NewCurrency {
        code: code.to_string(),
        name: name.to_string(),
        symbol: symbol.to_string(),
        exchange_rate: rate,
        is_enabled: true,
    }
}

pub fn item(product_id: Uuid, price: i64, quantity: i32) -> NewOrderItem {
    NewOrderItem {
        product_id,
        variant_id: None,
        product_name: format!("Product {}", &product_id.simple().to_string()[..6]),
        variant_name: None,
        sku: format!("SKU-{}", &product_id.simple().to_string()[..6]),
        price,
        quantity,
        weight: 0.5,
    }
}

pub fn customer() -> CustomerDetails {
    CustomerDetails {
        email: "jane@example.com".to_string(),
        full_name: Some("Jane Doe".to_string()),
        phone: None,
    }
}

pub fn address(country: &str) -> Address {
    Address {
        full_name: "Jane Doe".to_string(),
        line1: "1 Main Street".to_string(),
        line2: None,
        city: "Springfield".to_string(),
        postal_code: "12345".to_string(),
        region: None,
        country: country.to_string(),
    }
}

pub fn basket_discount(code: &str, method: DiscountMethod, value: Decimal) -> NewDiscount {
    let now = Utc::now();
    NewDiscount {
        code: code.to_string(),
        description: None,
        discount_type: DiscountType::Basket,
        method,
        value,
        min_order_value: 0,
        max_discount_value: 0,
        product_ids: Vec::new(),
        category_ids: Vec::new(),
        start_date: now - Duration::days(1),
        end_date: now + Duration::days(30),
        usage_limit: 0,
        active: true,
    }
}

pub fn flat_rate(method_id: Uuid, zone_id: Uuid, base_rate: i64) -> NewShippingRate {
    NewShippingRate {
        method_id,
        zone_id,
        base_rate,
        min_order_value: 0,
        free_shipping_threshold: None,
        weight_based_rates: Vec::new(),
        value_based_rates: Vec::new(),
    }
}

pub fn payment_event(
    order_id: Uuid,
    transaction_type: TransactionType,
    status: TransactionStatus,
    amount: i64,
    key: &str,
) -> NewPaymentTransaction {
    NewPaymentTransaction {
        order_id,
        external_id: Some(format!("ext_{}", key)),
        idempotency_key: Some(key.to_string()),
        transaction_type,
        status,
        amount,
        currency: "USD".to_string(),
        provider: "stripe".to_string(),
    }
}
