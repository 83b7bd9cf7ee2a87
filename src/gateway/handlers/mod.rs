//! HTTP handlers, one file per resource

pub mod admin;
pub mod health;
pub mod helpers;
#[cfg(feature = "mock-api")]
pub mod mock;
pub mod order;
pub mod payment;
pub mod wallet;

pub use health::health_check;
