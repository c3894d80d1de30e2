//! # EDA Services
//!
//! The three processes of the order pipeline, as a library plus thin binaries:
//!
//! - **order-service**: HTTP API that accepts orders and publishes
//!   `order.created`
//! - **inventory-service**: consumes `order.created`, reserves stock and
//!   publishes `inventory.reserved`
//! - **notification-service**: consumes `inventory.reserved` and notifies
//!   the customer
//!
//! ```text
//! POST /api/v1/orders ─► order_created ─► inventory ─► inventory_reserved ─► notification
//! ```
//!
//! Each binary loads [`config::Config`], initialises [`telemetry`], builds
//! its broker clients and runs until [`lifecycle::wait_for_signal`] or a
//! consume-loop error.

pub mod config;
pub mod handlers;
pub mod lifecycle;
pub mod order;
pub mod server;
pub mod telemetry;

pub use config::{Config, ConfigError, TopicRole};
