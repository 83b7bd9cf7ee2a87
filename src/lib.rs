//! digistore - Digital-Goods Storefront Core
//!
//! Inventory reservation, pricing, payment providers and exactly-once
//! settlement behind one HTTP gateway.
//!
//! # Modules
//!
//! - [`core_types`] - Ids, currency, order numbers
//! - [`money`] - Decimal rounding and provider amount parsing
//! - [`catalog`] - Products, SKUs, coupons, promotions
//! - [`inventory`] - Manual counters and the card-secret pool
//! - [`pricing`] - Cart pricing with coupons and promotions
//! - [`order`] - Order state machine and checkout
//! - [`payment`] - Provider abstraction, channels, payment rows
//! - [`wallet`] - Balance ledger
//! - [`settlement`] - Exactly-once settlement plus recovery/expiry workers
//! - [`notify`] - Outbound events and alerts
//! - [`gateway`] - axum HTTP surface
//! - [`app`] - Wiring from [`config::AppConfig`]

// Core types - must be first!
pub mod core_types;
pub mod money;

// Domain components
pub mod catalog;
pub mod inventory;
pub mod notify;
pub mod order;
pub mod payment;
pub mod pricing;
pub mod settlement;
pub mod wallet;

// Surfaces and infrastructure
pub mod app;
pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;

// Convenient re-exports at crate root
pub use app::{App, AppError, Stores};
pub use config::AppConfig;
pub use core_types::{Currency, UserId};
pub use inventory::InventoryLedger;
pub use order::{Order, OrderService, OrderStatus};
pub use payment::{PaymentService, ProviderRegistry};
pub use pricing::PricingEngine;
pub use settlement::{ExpirySweeper, RecoveryWorker, SettlementCoordinator};
pub use wallet::WalletLedger;
