//! StateSet Commerce Core
//!
//! Order, checkout and payment lifecycle engine: cart sessions that become
//! orders, discount and shipping pricing, multi-currency conversion, and an
//! idempotent payment-transaction ledger coupled to order payment status.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod repositories;
pub mod services;

pub use errors::ServiceError;
