// Shared building blocks
pub mod metadata;

// Pricing
pub mod currency;
pub mod discount;
pub mod shipping;

// Aggregates
pub mod checkout;
pub mod order;
pub mod payment_transaction;

pub use checkout::{Checkout, CheckoutItem, CheckoutPolicy, CheckoutStatus};
pub use currency::{Currency, NewCurrency};
pub use discount::{
    CategoryResolver, Discount, DiscountMethod, DiscountType, NewDiscount, NoCategoryResolver,
    StaticCategoryResolver,
};
pub use metadata::EntityMetadata;
pub use order::{
    Address, AppliedDiscount, CustomerDetails, NewOrderItem, Order, OrderItem, OrderStatus,
    PaymentStatus,
};
pub use payment_transaction::{
    NewPaymentTransaction, PaymentBalances, PaymentTransaction, TransactionStatus, TransactionType,
};
pub use shipping::{
    NewShippingRate, ShippingMethod, ShippingOption, ShippingRate, ShippingZone, ValueBasedRate,
    WeightBasedRate,
};
