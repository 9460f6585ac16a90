//! gmpanel: schema-driven entity management for a game admin panel.
//!
//! A declarative field/permission description of each domain entity turns
//! into full CRUD with audit logging, soft/hard delete, pagination, and
//! UI form/table projection, plus a TTL-cached metrics layer for dashboard
//! statistics. Single process, one sqlite store, cooperative concurrency.

pub mod audit;
pub mod cache;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod projector;
pub mod query;
pub mod registry;
pub mod store;
